//! Default collaborator implementations

pub mod builder;
pub mod command;
pub mod extractor;
pub mod inspector;
pub mod notifier;
pub mod uploader;

pub use builder::CommandBuilder;
pub use extractor::ArchiveExtractor;
pub use inspector::PassthroughInspector;
pub use notifier::{GmailNotifier, LogNotifier, WebhookNotifier};
pub use uploader::StorageUploader;
