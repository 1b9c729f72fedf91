pub mod annotate;
pub mod audio;
pub mod client;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod notify;
pub mod page;
pub mod settings;
pub mod surface;
pub mod toolbar;
pub mod voice;

pub use client::{AssistClient, Issue, RewriteMode, ServiceHealth, ToneReport};
pub use engine::Engine;
pub use error::AssistError;
pub use page::{PageDom, PageEvent, SharedPage};
pub use settings::{Settings, SettingsStore, SETTINGS_FILE_NAME};
pub use surface::{Surface, SurfaceKind};
