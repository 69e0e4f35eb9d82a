pub mod descriptor;
pub mod error;
pub mod host;
pub mod ident;
pub mod layout;
pub mod version;
pub mod xml;

pub use descriptor::{Capability, DescriptorMeta, DescriptorOrigin, PluginDescriptor};
pub use error::{is_interruption, IcyError};
pub use host::{
    Announcement, Credentials, ExceptionReporter, HeadlessHost, HostInterface, LogExceptionReporter,
    LogNotifier, NoProgress, Notifier, ProgressReporter, RepositorySource, ResourceFetcher, UiTask,
};
pub use ident::{find_ident, latest_of, PluginIdent, PluginOnlineIdent};
pub use layout::{PluginLayout, PLUGIN_PACKAGE};
pub use version::Version;
