//! Tab and sub-session lifecycle.
//!
//! Each tab holds 1–8 sub-sessions, exactly one of which is active. At most
//! one tab is visible; only the active sub-session of the visible tab is
//! shown and fitted to the render surface. Hidden sub-sessions keep their
//! connections (and any recording) running.
//!
//! Every operation on an unknown tab or sub-session id is a no-op.

use std::collections::BTreeMap;

use tabmux_core::{Geometry, TerminalBuffer};
use tracing::{debug, info, warn};

use crate::capture::Mark;
use crate::connection::{ConnEvent, ConnState, ConnectionManager, Hooks, TimerTask};
use crate::transport::{TransportEvent, TransportFactory};
use crate::{SubId, TabId};

/// Upper bound on sub-sessions per tab.
pub const MAX_SUB_SESSIONS: usize = 8;

/// One remote shell inside a tab.
pub struct SubSession {
    pub id: SubId,
    pub name: String,
    pub conn: ConnectionManager,
    /// Most recent command mark, if any.
    pub mark: Option<Mark>,
}

/// A workspace tab.
pub struct Tab {
    pub id: TabId,
    subs: BTreeMap<SubId, SubSession>,
    active: SubId,
    next_sub_id: SubId,
}

impl Tab {
    pub fn active_id(&self) -> SubId {
        self.active
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn sub(&self, id: SubId) -> Option<&SubSession> {
        self.subs.get(&id)
    }

    pub fn sub_mut(&mut self, id: SubId) -> Option<&mut SubSession> {
        self.subs.get_mut(&id)
    }

    pub fn active(&self) -> Option<&SubSession> {
        self.subs.get(&self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut SubSession> {
        self.subs.get_mut(&self.active)
    }

    /// Sub-session ids in ascending order.
    pub fn sub_ids(&self) -> Vec<SubId> {
        self.subs.keys().copied().collect()
    }
}

/// Snapshot of a sub-session for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSessionInfo {
    pub id: SubId,
    pub name: String,
    pub state: ConnState,
    pub active: bool,
    pub backoff_ms: u64,
}

/// Owns every tab and decides what is on screen.
pub struct SessionMultiplexer {
    tabs: BTreeMap<TabId, Tab>,
    visible_tab: Option<TabId>,
    factory: Box<dyn TransportFactory>,
    token: String,
    scrollback: usize,
}

impl SessionMultiplexer {
    pub fn new(factory: Box<dyn TransportFactory>, token: String, scrollback: usize) -> Self {
        Self {
            tabs: BTreeMap::new(),
            visible_tab: None,
            factory,
            token,
            scrollback,
        }
    }

    pub fn tab(&self, tab_id: &str) -> Option<&Tab> {
        self.tabs.get(tab_id)
    }

    pub fn tab_mut(&mut self, tab_id: &str) -> Option<&mut Tab> {
        self.tabs.get_mut(tab_id)
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.keys().cloned().collect()
    }

    pub fn visible_tab(&self) -> Option<&str> {
        self.visible_tab.as_deref()
    }

    pub fn sub_sessions(&self, tab_id: &str) -> Vec<SubSessionInfo> {
        let Some(tab) = self.tabs.get(tab_id) else {
            return Vec::new();
        };
        tab.subs
            .values()
            .map(|s| SubSessionInfo {
                id: s.id,
                name: s.name.clone(),
                state: s.conn.state(),
                active: s.id == tab.active,
                backoff_ms: s.conn.backoff_ms(),
            })
            .collect()
    }

    /// Buffer of the tab's active sub-session.
    pub fn active_buffer(&self, tab_id: &str) -> Option<&dyn TerminalBuffer> {
        self.tabs.get(tab_id)?.active().map(|s| s.conn.buffer())
    }

    /// Geometry of the tab's active sub-session.
    pub fn active_geometry(&self, tab_id: &str) -> Option<Geometry> {
        self.tabs.get(tab_id)?.active().map(|s| s.conn.geometry())
    }

    /// Create a tab with one auto-created sub-session. False if it exists.
    pub fn create_tab(&mut self, tab_id: &str, hooks: &mut Hooks<'_>) -> bool {
        if self.tabs.contains_key(tab_id) {
            return false;
        }
        let tab = Tab {
            id: tab_id.to_string(),
            subs: BTreeMap::new(),
            active: 1,
            next_sub_id: 1,
        };
        self.tabs.insert(tab_id.to_string(), tab);
        info!(tab_id, "tab created");
        self.create_sub_session(tab_id, hooks).is_some()
    }

    /// Tear down every sub-session of a tab and forget it.
    pub fn close_tab(&mut self, tab_id: &str, hooks: &mut Hooks<'_>) -> bool {
        let Some(mut tab) = self.tabs.remove(tab_id) else {
            return false;
        };
        for sub in tab.subs.values_mut() {
            sub.conn.dispatch(ConnEvent::TearDown, hooks);
        }
        if self.visible_tab.as_deref() == Some(tab_id) {
            self.visible_tab = None;
        }
        info!(tab_id, "tab closed");
        true
    }

    /// Add a sub-session named "Shell N" and make it active.
    ///
    /// Returns `None` for an unknown tab or when the tab is already at
    /// [`MAX_SUB_SESSIONS`].
    pub fn create_sub_session(&mut self, tab_id: &str, hooks: &mut Hooks<'_>) -> Option<SubId> {
        let tab = self.tabs.get_mut(tab_id)?;
        if tab.subs.len() >= MAX_SUB_SESSIONS {
            warn!(tab_id, limit = MAX_SUB_SESSIONS, "sub-session limit reached");
            return None;
        }
        let id = tab.next_sub_id;
        tab.next_sub_id += 1;

        let geometry = hooks.surface.measure();
        let transport = self.factory.create(tab_id, id);
        let mut conn = ConnectionManager::new(
            tab_id.to_string(),
            id,
            self.token.clone(),
            geometry,
            self.scrollback,
            transport,
        );
        conn.start();
        tab.subs.insert(
            id,
            SubSession {
                id,
                name: format!("Shell {id}"),
                conn,
                mark: None,
            },
        );
        info!(tab_id, sub_id = id, "sub-session created");
        self.switch_active(tab_id, id, hooks);
        Some(id)
    }

    /// Destroy a sub-session. The last one of a tab cannot be removed.
    pub fn remove_sub_session(&mut self, tab_id: &str, id: SubId, hooks: &mut Hooks<'_>) -> bool {
        let visible = self.visible_tab.as_deref() == Some(tab_id);
        let Some(tab) = self.tabs.get_mut(tab_id) else {
            return false;
        };
        if tab.subs.len() <= 1 {
            debug!(tab_id, sub_id = id, "refusing to remove the last sub-session");
            return false;
        }
        let Some(mut sub) = tab.subs.remove(&id) else {
            return false;
        };
        sub.conn.dispatch(ConnEvent::TearDown, hooks);
        info!(tab_id, sub_id = id, "sub-session removed");

        if tab.active == id {
            if let Some(&lowest) = tab.subs.keys().next() {
                tab.active = lowest;
                if visible {
                    if let Some(next) = tab.subs.get_mut(&lowest) {
                        show(tab_id, next, hooks);
                    }
                }
            }
        }
        true
    }

    /// Make `id` the tab's active sub-session.
    pub fn switch_active(&mut self, tab_id: &str, id: SubId, hooks: &mut Hooks<'_>) -> bool {
        let visible = self.visible_tab.as_deref() == Some(tab_id);
        let Some(tab) = self.tabs.get_mut(tab_id) else {
            return false;
        };
        if !tab.subs.contains_key(&id) {
            return false;
        }
        if let Some(prev) = tab.subs.get_mut(&tab.active) {
            prev.conn.set_visible(false);
        }
        tab.active = id;
        if visible {
            if let Some(next) = tab.subs.get_mut(&id) {
                show(tab_id, next, hooks);
            }
        }
        true
    }

    /// Bring a tab on screen, hiding the previously visible one.
    pub fn activate_tab(&mut self, tab_id: &str, hooks: &mut Hooks<'_>) -> bool {
        if !self.tabs.contains_key(tab_id) {
            return false;
        }
        if let Some(prev_id) = self.visible_tab.take() {
            if let Some(prev) = self.tabs.get_mut(&prev_id) {
                for sub in prev.subs.values_mut() {
                    sub.conn.set_visible(false);
                }
            }
        }
        self.visible_tab = Some(tab_id.to_string());
        if let Some(sub) = self.tabs.get_mut(tab_id).and_then(Tab::active_mut) {
            show(tab_id, sub, hooks);
        }
        true
    }

    /// Refit the visible sub-session after the render surface changed.
    pub fn reflow_visible(&mut self, hooks: &mut Hooks<'_>) -> bool {
        let Some(tab_id) = self.visible_tab.clone() else {
            return false;
        };
        match self.tabs.get_mut(&tab_id).and_then(Tab::active_mut) {
            Some(sub) => {
                reflow(sub, hooks);
                true
            }
            None => false,
        }
    }

    /// Forward user input to the tab's active sub-session.
    pub fn send_input(&mut self, tab_id: &str, data: &str, hooks: &mut Hooks<'_>) -> bool {
        match self.tabs.get_mut(tab_id).and_then(Tab::active_mut) {
            Some(sub) => sub.conn.dispatch(ConnEvent::Input(data.to_string()), hooks),
            None => false,
        }
    }

    /// Route an inbound transport event to its sub-session.
    pub fn on_transport(&mut self, event: TransportEvent, hooks: &mut Hooks<'_>) -> bool {
        match self
            .tabs
            .get_mut(&event.tab_id)
            .and_then(|t| t.subs.get_mut(&event.sub_id))
        {
            Some(sub) => sub.conn.on_transport(event.attempt, event.kind, hooks),
            None => {
                debug!(tab_id = %event.tab_id, sub_id = event.sub_id, "event for unknown sub-session");
                false
            }
        }
    }

    /// Run a due timer.
    pub fn on_timer(&mut self, task: TimerTask, hooks: &mut Hooks<'_>) -> bool {
        match task {
            TimerTask::Reconnect { tab_id, sub_id } => {
                match self.tabs.get_mut(&tab_id).and_then(|t| t.subs.get_mut(&sub_id)) {
                    Some(sub) => sub.conn.dispatch(ConnEvent::ReconnectDue, hooks),
                    None => false,
                }
            }
        }
    }
}

/// Put a sub-session on screen: mark it visible, refit it, repaint.
fn show(tab_id: &str, sub: &mut SubSession, hooks: &mut Hooks<'_>) {
    sub.conn.set_visible(true);
    reflow(sub, hooks);
    hooks.view.redraw(tab_id, sub.id, sub.conn.buffer());
}

fn reflow(sub: &mut SubSession, hooks: &mut Hooks<'_>) {
    let geometry = hooks.surface.measure();
    sub.conn.dispatch(ConnEvent::Resize(geometry), hooks);
}
