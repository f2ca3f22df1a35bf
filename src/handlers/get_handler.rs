use crate::prelude::*;

pub fn handle_get(
    request: &HttpRequest,
    response: &mut HttpResponse,
    r_cfg: &RouteConfig,
    s_cfg: &Arc<ServerConfig>,
) -> ActiveAction {
    let root = r_cfg.root.as_deref().unwrap_or(&s_cfg.root);
    let relative_path = request.url.split('?').next().unwrap_or(&request.url);
    let relative_path = relative_path.strip_prefix(&r_cfg.path).unwrap_or(relative_path);

    let Some(mut path) = resolve_within_root(root, relative_path) else {
        response.set_status_code(HTTP_FORBIDDEN);
        response.set_body(b"403 Forbidden: path escapes document root".to_vec(), "text/plain");
        return ActiveAction::None;
    };

    if path.is_dir() {
        let index_files = if r_cfg.index.is_empty() { &s_cfg.index } else { &r_cfg.index };
        let found_index = index_files.iter().map(|name| path.join(name)).find(|p| p.is_file());

        match found_index {
            Some(index_path) => path = index_path,
            None => {
                let autoindex = r_cfg.autoindex.unwrap_or(s_cfg.autoindex);
                if autoindex {
                    generate_autoindex(response, &path, &request.url);
                    return ActiveAction::None;
                } else {
                    response.set_status_code(HTTP_FORBIDDEN);
                    response.set_body(b"403 Forbidden: Directory listing denied".to_vec(), "text/plain");
                    return ActiveAction::None;
                }
            }
        }
    }

    match File::open(&path) {
        Ok(file) => {
            let Ok(metadata) = file.metadata() else {
                handle_error(response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg));
                return ActiveAction::None;
            };
            let file_size = metadata.size() as usize;
            let mime_type = get_mime_type(path.extension().and_then(|s| s.to_str()));

            response.set_status_code(HTTP_OK);
            response.headers.insert("content-length".to_string(), file_size.to_string());
            response.headers.insert("content-type".to_string(), mime_type.to_string());

            ActiveAction::FileDownload(file, file_size)
        }
        Err(e) => {
            match e.kind() {
                std::io::ErrorKind::NotFound => handle_error(response, HTTP_NOT_FOUND, Some(s_cfg)),
                std::io::ErrorKind::PermissionDenied => handle_error(response, HTTP_FORBIDDEN, Some(s_cfg)),
                _ => handle_error(response, HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
            };
            ActiveAction::None
        }
    }
}
