use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A side effect requested by trigger code, in call order.
///
/// The interpreter only records effects; the trigger scheduler performs
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEffect {
    RunAction {
        action: String,
    },
    StoreValue {
        key: String,
        value: Value,
        persist: bool,
    },
    ClearStore,
    NavigateTo {
        page: String,
        params: Value,
    },
    ShowAlert {
        message: String,
        style: Option<String>,
    },
    ResetWidget {
        widget: String,
    },
    ShowModal {
        name: String,
    },
    CloseModal {
        name: String,
    },
    CopyToClipboard {
        text: String,
    },
    Download {
        data: Value,
        name: String,
    },
}

impl TriggerEffect {
    /// Short name for logs and scheduler step labels.
    pub fn label(&self) -> String {
        match self {
            TriggerEffect::RunAction { action } => format!("{action}.run"),
            TriggerEffect::StoreValue { key, .. } => format!("storeValue({key})"),
            TriggerEffect::ClearStore => "clearStore".to_string(),
            TriggerEffect::NavigateTo { page, .. } => format!("navigateTo({page})"),
            TriggerEffect::ShowAlert { .. } => "showAlert".to_string(),
            TriggerEffect::ResetWidget { widget } => format!("resetWidget({widget})"),
            TriggerEffect::ShowModal { name } => format!("showModal({name})"),
            TriggerEffect::CloseModal { name } => format!("closeModal({name})"),
            TriggerEffect::CopyToClipboard { .. } => "copyToClipboard".to_string(),
            TriggerEffect::Download { name, .. } => format!("download({name})"),
        }
    }
}
