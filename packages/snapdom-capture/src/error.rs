/// The only user-visible capture failures. Everything else — missing
/// resources, unreadable stylesheets, broken pseudos, failed iframes —
/// degrades into a still-valid capture.
#[derive(Debug)]
pub enum CaptureError {
    /// The capture root was missing, not an element, or otherwise not
    /// capturable.
    BadInput(String),
    /// The capture root could not be measured.
    Measure(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::BadInput(msg) => write!(f, "bad capture input: {msg}"),
            CaptureError::Measure(msg) => write!(f, "failed to measure capture root: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}
