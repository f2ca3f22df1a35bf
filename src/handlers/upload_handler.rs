use crate::prelude::*;

/// Routes a chunk of request body bytes into the active upload, lazily
/// creating the `Upload` state machine on first call.
pub fn execute_active_action(
    request: &HttpRequest,
    upload_manager: &mut Option<Upload>,
    action: &mut ActiveAction,
    start: usize,
    to_process: usize,
    boundary: &str,
) -> std::result::Result<(), ParseError> {
    let chunk = &request.buffer[start..start + to_process];
    if let ActiveAction::Upload(upload_path) = action {
        if upload_manager.is_none() {
            *upload_manager = Some(Upload::new(upload_path.clone(), boundary));
        }

        if let Some(mgr) = upload_manager {
            if !boundary.is_empty() {
                mgr.upload_body_with_boundry(request, chunk);
            } else {
                mgr.upload_simple_body(request, chunk);
            }
            if let UploadState::Error(code) = mgr.state {
                return Err(ParseError::Error(code));
            }
        }
    }
    Ok(())
}
