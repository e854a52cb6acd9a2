//! JSON control frames sent from the client to a remote shell endpoint.
//!
//! The server side answers with raw output bytes as the transport payload;
//! only the client direction is framed.

use serde::{Deserialize, Serialize};

use crate::error::MuxResult;

/// A client → server control frame.
///
/// `Init` is only ever the first frame on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Init {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "subTabId")]
        sub_tab_id: u32,
        token: String,
        cols: u16,
        rows: u16,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    Input {
        data: String,
    },
}

impl ClientFrame {
    /// Encode as a single JSON text frame.
    pub fn encode(&self) -> MuxResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
