use serde::Serialize;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ProgressState {
    pub is_active: bool,
    pub title: String,
    pub message: String,
    pub package: Option<String>,
    pub cancellation_requested: bool,
}
