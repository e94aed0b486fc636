pub mod adapter;
pub mod calendar;
pub mod contacts;
pub mod docs;
pub mod drive;
pub mod forms;
pub mod gmail;
pub mod http;
pub mod output;
pub mod params;
pub mod registry;
pub mod sheets;
pub mod slides;
pub mod tasks;

pub use adapter::{
    AdapterSettings, OperationShape, OperationSpec, ParamKind, ParamSlot, ServiceAdapter,
    ServiceDescriptor,
};
pub use output::{ListItem, OperationOutput};
pub use params::Params;
pub use registry::ServiceRegistry;

/// OAuth scopes used by the adapters.
pub mod scopes {
    pub const CALENDAR: &str = "https://www.googleapis.com/auth/calendar";
    pub const GMAIL_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";
    pub const DRIVE: &str = "https://www.googleapis.com/auth/drive";
    pub const DOCUMENTS: &str = "https://www.googleapis.com/auth/documents";
    pub const SPREADSHEETS: &str = "https://www.googleapis.com/auth/spreadsheets";
    pub const PRESENTATIONS: &str = "https://www.googleapis.com/auth/presentations";
    pub const TASKS: &str = "https://www.googleapis.com/auth/tasks";
    pub const CONTACTS: &str = "https://www.googleapis.com/auth/contacts";
    pub const FORMS_BODY: &str = "https://www.googleapis.com/auth/forms.body";
}
