pub mod bridge;
pub mod keyword;
pub mod remote;
pub mod schema;

use async_trait::async_trait;
use chrono::NaiveDate;
use workdesk_core::{Intent, Result, SessionContext};
use workdesk_services::ServiceDescriptor;

pub use bridge::IntentBridge;
pub use keyword::KeywordClassifier;
pub use remote::{ClassificationService, OpenAiClassificationService, RemoteClassifier};
pub use schema::{ClassificationRequest, ClassificationResponse, IntentSchema, SchemaEntry};

/// Everything a classifier may look at for one utterance.
pub struct ClassifyInput<'a> {
    pub raw_text: &'a str,
    pub services: &'a [&'a ServiceDescriptor],
    pub context: &'a SessionContext,
    pub today: NaiveDate,
}

/// One classification stage. An `Err` means the stage could not answer;
/// an unresolved `Intent` means it answered "no command".
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, input: &ClassifyInput<'_>) -> Result<Intent>;
}
