use crate::application::dispatcher::JobDispatcher;

#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: JobDispatcher,
    /// When false, internal error detail is logged but never sent to clients.
    pub expose_internal_errors: bool,
    pub max_body_bytes: usize,
}
