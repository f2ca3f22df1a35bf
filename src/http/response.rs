use crate::config::types::ServerConfig;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Sent on every response's `Server` header, also reused as CGI's
/// `SERVER_SOFTWARE` environment variable.
pub const SERVER_SOFTWARE: &str = "webserv/0.1";

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = HttpResponse::status_text(code).to_string();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = self.to_bytes_headers_only();
        res.extend_from_slice(&self.body);
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut res = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.status_text
        )
        .into_bytes();

        if !self.headers.contains_key("server") {
            res.extend_from_slice(format!("Server: {SERVER_SOFTWARE}\r\n").as_bytes());
        }
        if !self.headers.contains_key("date") {
            res.extend_from_slice(format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())).as_bytes());
        }

        for (key, val) in &self.headers {
            let formatted_key = Self::to_pascal_case(key);
            res.extend_from_slice(format!("{formatted_key}: {val}\r\n").as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code, HttpResponse::status_text(code));
        res.set_header("location", target_url)
            .set_header("content-length", "0");
        res
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

pub fn get_ext_from_content_type(content_type: &str) -> &str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "application/json" => ".json",
        "application/pdf" => ".pdf",
        "application/xml" => ".xml",
        "application/zip" => ".zip",
        "audio/mpeg" => ".mp3",
        "image/gif" => ".gif",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/svg+xml" => ".svg",
        "image/webp" => ".webp",
        "text/css" => ".css",
        "text/html" => ".html",
        "text/javascript" => ".js",
        "text/plain" => ".txt",
        "video/mp4" => ".mp4",
        _ => ".bin",
    }
}

pub fn generate_autoindex(response: &mut HttpResponse, path: &Path, original_url: &str) {
    let mut html = format!("<html><body><h1>Index of {original_url}</h1><ul>");
    if let Ok(entries) = path.read_dir() {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                html.push_str(&format!(
                    "<li><a href=\"{}/{}\">{}</a></li>",
                    original_url.trim_end_matches('/'),
                    name,
                    name
                ));
            }
        }
    }
    html.push_str("</ul></body></html>");
    response.set_status_code(200);
    response.set_body(html.into_bytes(), "text/html");
}

/// Resolves an error response body: a vhost's configured error page, falling
/// back to a synthesized plain-text body. Always forces `Connection: close`,
/// since a client cannot trust the framing of a response the server
/// couldn't complete normally.
pub fn handle_error(response: &mut HttpResponse, code: u16, s_cfg: Option<&Arc<ServerConfig>>) {
    if let Some(cfg) = s_cfg {
        if let Some(path_str) = cfg.error_pages.get(&code) {
            let root = Path::new(&cfg.root);
            let err_path = root.join(path_str.trim_start_matches('/'));
            if let Ok(content) = fs::read(&err_path) {
                response.set_status_code(code).set_body(content, "text/html");
                response.set_header("connection", "close");
                return;
            }
        }
        if let Some(dir) = &cfg.error_page_dir {
            let err_path = Path::new(dir).join(format!("{code}.html"));
            if let Ok(content) = fs::read(&err_path) {
                response.set_status_code(code).set_body(content, "text/html");
                response.set_header("connection", "close");
                return;
            }
        }
    }

    response.set_status_code(code);
    let body = format!("{} {}", code, HttpResponse::status_text(code)).into_bytes();
    response.set_body(body, "text/plain");
    response.set_header("connection", "close");
}
