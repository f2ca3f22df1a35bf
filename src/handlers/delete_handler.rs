use crate::prelude::*;

pub fn handle_delete(
    request: &HttpRequest,
    response: &mut HttpResponse,
    r_cfg: &RouteConfig,
    s_cfg: &Arc<ServerConfig>,
) {
    if r_cfg.cgi_ext.is_some() {
        return handle_error(response, HTTP_FORBIDDEN, Some(s_cfg));
    }

    let root = r_cfg.root.as_deref().unwrap_or(&s_cfg.root);
    let upload_base = PathBuf::from(root).join(&r_cfg.upload_dir);

    let relative_path = request.url.strip_prefix(&r_cfg.path).unwrap_or("");
    let target_path = upload_base.join(relative_path.trim_start_matches('/'));

    // Canonicalize both sides to reject DELETE /upload/../../etc/passwd.
    let absolute_upload_base = match upload_base.canonicalize() {
        Ok(path) => path,
        Err(_) => return handle_error(response, HTTP_NOT_FOUND, Some(s_cfg)),
    };

    let absolute_target = match target_path.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            return match e.kind() {
                ErrorKind::NotFound => handle_error(response, HTTP_NOT_FOUND, Some(s_cfg)),
                _ => handle_error(response, HTTP_FORBIDDEN, Some(s_cfg)),
            };
        }
    };

    if !absolute_target.starts_with(&absolute_upload_base) {
        return handle_error(response, HTTP_FORBIDDEN, Some(s_cfg));
    }

    if absolute_target.is_dir() {
        return handle_error(response, HTTP_FORBIDDEN, Some(s_cfg));
    }

    match fs::remove_file(&absolute_target) {
        Ok(_) => {
            response.set_status_code(HTTP_NO_CONTENT);
        }
        Err(e) => match e.kind() {
            ErrorKind::PermissionDenied => handle_error(response, HTTP_FORBIDDEN, Some(s_cfg)),
            _ => handle_error(response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
        },
    }
}
