//! OpenSSH-backed remote sessions.
//!
//! Provides:
//! - `SshSession` - a `RemoteSession` over one ControlMaster connection
//! - `SshCommandBuilder` - argument construction for the `ssh` client
//! - `Credentials` - key passphrase / password taken from the environment
//! - Executable resolution for the `ssh` binary

mod askpass;
pub mod binary;
pub mod command;
pub mod credentials;
pub mod session;

pub use binary::resolve_ssh_binary;
pub use command::{AuthMethod, CommandBuildError, SshCommandBuilder, SshTarget};
pub use credentials::Credentials;
pub use session::{SshConfig, SshSession};
