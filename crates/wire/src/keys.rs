//! Well-known wire keys and control vocabulary
//!
//! Every frame carries the sender identity under [`MAC`] (text namespace)
//! and the routing flag under [`COMMAND_ENABLED`] (boolean namespace).
//! Control frames add [`COMMAND`] and [`ARGUMENT`], and optionally
//! [`ARGUMENT_DATA`], [`COMMAND_ARGUMENT`] and [`ACCESS_KEY`].

/// Sender stable identity (text)
pub const MAC: &str = "MAC";

/// Routing flag: true marks a control frame (boolean)
pub const COMMAND_ENABLED: &str = "COMMAND_ENABLED";

/// Protocol command (text, control frames only)
pub const COMMAND: &str = "COMMAND";

/// Command argument (text, control frames only)
pub const ARGUMENT: &str = "ARGUMENT";

/// Machine-checkable argument detail on replies (text)
pub const ARGUMENT_DATA: &str = "ARGUMENT_DATA";

/// Free-text human-readable reason on replies (text)
pub const COMMAND_ARGUMENT: &str = "COMMAND_ARGUMENT";

/// Access key presented with the initial connect (text)
pub const ACCESS_KEY: &str = "ACCESS_KEY";

/// Control command vocabulary, matched case-insensitively on the wire
pub mod command {
    pub const CONNECT: &str = "connect";
    pub const ACCEPT: &str = "accept";
    pub const DECLINE: &str = "decline";
    pub const RENAME: &str = "rename";
    pub const DISCONNECT: &str = "disconnect";
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";

    /// Reply argument naming an unrecognized command
    pub const UNKNOWN: &str = "unknown";
    /// Reply argument for data-frame acknowledgements
    pub const MESSAGE: &str = "message";
    /// Reply argument for frames missing required routing fields
    pub const MALFORMED: &str = "malformed";
}
