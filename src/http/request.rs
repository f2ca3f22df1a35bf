use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    DELETE,
}

impl Method {
    pub fn is_allowed(&self, allowed_methods: &[String]) -> bool {
        if *self == Method::HEAD {
            return allowed_methods.iter().any(|m| m == "GET" || m == "HEAD");
        }
        allowed_methods.iter().any(|m| m == self.as_str())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
    Error,
}

const CRLN_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUtf8(std::string::FromUtf8Error),
    UnexpectedEof,
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidChunkSize,
    PayloadTooLarge,
    ParseHexError,
    Error(u16),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "invalid HTTP method"),
            ParseError::InvalidUtf8(_) => write!(f, "invalid UTF-8 in request"),
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::HeaderTooLong => write!(f, "header line too long"),
            ParseError::TooManyHeaders => write!(f, "too many headers"),
            ParseError::InvalidHeaderName => write!(f, "invalid header name"),
            ParseError::InvalidHeaderValue => write!(f, "invalid header value"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
            ParseError::ParseHexError => write!(f, "invalid chunk size encoding"),
            ParseError::Error(_) => write!(f, "other error"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::string::FromUtf8Error> for ParseError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ParseError::InvalidUtf8(err)
    }
}

#[derive(Debug)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCRLF,
    ReadTrailers,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::GET,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            body: Vec::new(),
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
        }
    }

    pub fn clear(&mut self) {
        self.state = ParsingState::RequestLine;
        self.headers.clear();
        self.trailers.clear();
        self.body.clear();
        self.chunk_state = ChunkState::ReadSize;
    }

    pub fn finish_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.clear();
    }

    /// Drives the state machine as far as the currently buffered bytes
    /// allow, completing zero or more requests and appending their
    /// responses to `conn.write_buffer`. Returns whether the connection
    /// should now be closed.
    pub fn proces_request(
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        conn: &mut HttpConnection,
        session_store: &mut SessionStore,
    ) -> Result<bool> {
        let mut closed = false;
        loop {
            match HttpRequest::parse_request(conn, poll, next_token, cgi_to_client, token, session_store) {
                Ok(()) => {
                    trace!("request parsing reached completion");

                    if let Some(upload_manager) = &mut conn.upload_manager {
                        let s_cfg = conn.s_cfg.as_ref().unwrap().clone();
                        Upload::handel_upload_manager(&mut conn.response, upload_manager, &s_cfg);
                        conn.upload_manager = None;
                    }

                    let bytes = conn.response.to_bytes();
                    conn.write_buffer.extend_from_slice(&bytes);
                    conn.request.finish_request();
                    break;
                }
                Err(ParseError::IncompleteRequestLine) => break,
                Err(e) => {
                    let code = match e {
                        ParseError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
                        ParseError::InvalidMethod => HTTP_METHOD_NOT_ALLOWED,
                        ParseError::HeaderTooLong => HTTP_URI_TOO_LONG,
                        _ => HTTP_BAD_REQUEST,
                    };
                    warn!("request parse error: {e}, responding {code}");
                    handle_error(&mut conn.response, code, conn.s_cfg.as_ref());
                    closed = true;
                    let bytes = conn.response.to_bytes();
                    conn.write_buffer.extend_from_slice(&bytes);
                    conn.request.finish_request();
                    break;
                }
            }
        }

        if !conn.write_buffer.is_empty() || matches!(conn.action, ActiveAction::FileDownload(_, _)) {
            poll.registry().reregister(
                &mut conn.stream,
                token,
                Interest::READABLE | Interest::WRITABLE,
            )?;
        }
        Ok(closed)
    }

    pub fn parse_request(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
        session_store: &mut SessionStore,
    ) -> core::result::Result<(), ParseError> {
        loop {
            let res = match conn.request.state {
                ParsingState::RequestLine => conn.request.parse_request_line(),
                ParsingState::Headers => HttpRequest::parse_headers(conn),
                ParsingState::HeadersDone => {
                    HttpRequest::setup_action(conn, poll, next_token, cgi_to_client, client_token, session_store)
                }
                ParsingState::Body => HttpRequest::parse_unchunked_body(poll, conn),
                ParsingState::ChunkedBody => match HttpRequest::parse_chunked_body(conn) {
                    Ok(true) => {
                        conn.request.state = ParsingState::Complete;
                        Ok(())
                    }
                    Ok(false) => return Err(ParseError::IncompleteRequestLine),
                    Err(e) => Err(e),
                },
                _ => break,
            };

            match res {
                Ok(_) => {
                    if conn.request.state == ParsingState::Complete {
                        break;
                    }
                }
                Err(ParseError::IncompleteRequestLine) => return Err(ParseError::IncompleteRequestLine),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn setup_action(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
        session_store: &mut SessionStore,
    ) -> core::result::Result<(), ParseError> {
        let s_cfg = conn.resolve_config();
        conn.s_cfg = Some(Arc::clone(&s_cfg));

        if conn.request.version != "HTTP/1.1" && conn.request.version != "HTTP/1.0" {
            handle_error(&mut conn.response, HTTP_VERSION_NOT_SUPPORTED, Some(&s_cfg));
            conn.close_after_response = true;
            conn.request.state = ParsingState::Complete;
            return Ok(());
        }

        let client_wants_close = match conn.request.headers.get("connection").map(|v| v.to_lowercase()) {
            Some(ref v) if v == "close" => true,
            Some(ref v) if v == "keep-alive" => false,
            _ => conn.request.version == "HTTP/1.0",
        };

        let content_length = conn
            .request
            .headers
            .get("content-length")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        let is_chunked = conn
            .request
            .headers
            .get("transfer-encoding")
            .map(|v| v.contains("chunked"))
            .unwrap_or(false);

        let content_type = conn
            .request
            .headers
            .get("content-type")
            .map(|s| s.as_str())
            .unwrap_or("");

        conn.boundary = content_type
            .split("boundary=")
            .nth(1)
            .map(|b| b.trim())
            .unwrap_or("")
            .to_string();

        if !is_chunked && content_length > s_cfg.client_max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        conn.body_remaining = content_length;

        let cookie_header = conn.request.headers.get("cookie").cloned();
        conn.session_id = Some(session_store.sync_session(cookie_header.as_ref(), &mut conn.response));

        let method = conn.request.method.clone();
        let url = conn.request.url.clone();

        let done_now = match s_cfg.find_route(&url, &method) {
            Ok(r_cfg) => {
                if !r_cfg.is_addr_allowed(&conn.remote_addr.ip()) {
                    handle_error(&mut conn.response, HTTP_FORBIDDEN, Some(&s_cfg));
                    true
                } else if let Some(redirect_url) = &r_cfg.redirection {
                    conn.response = HttpResponse::redirect(r_cfg.redirect_code.unwrap_or(HTTP_FOUND), redirect_url);
                    true
                } else if r_cfg.cgi_ext.as_ref().map_or(false, |ext| url.ends_with(ext.as_str())) {
                    if method == Method::DELETE {
                        handle_error(&mut conn.response, HTTP_FORBIDDEN, Some(&s_cfg));
                        true
                    } else if cgi_to_client.len() / 2 >= MAX_CONCURRENT_CGI {
                        warn!("CGI admission control: {} active, rejecting new spawn", cgi_to_client.len() / 2);
                        handle_error(&mut conn.response, HTTP_SERVICE_UNAVAILABLE, Some(&s_cfg));
                        true
                    } else {
                        match start_cgi(conn, &s_cfg, r_cfg, poll, next_token, cgi_to_client, client_token) {
                            Ok(()) => false,
                            Err(()) => {
                                handle_error(&mut conn.response, HTTP_INTERNAL_SERVER_ERROR, Some(&s_cfg));
                                true
                            }
                        }
                    }
                } else {
                    match method {
                        Method::GET | Method::HEAD => {
                            let action = handle_get(&conn.request, &mut conn.response, r_cfg, &s_cfg);
                            if method == Method::HEAD {
                                conn.response.body.clear();
                                conn.action = ActiveAction::None;
                            } else {
                                conn.action = action;
                            }
                            true
                        }
                        Method::POST => {
                            if !r_cfg.upload_dir.is_empty() {
                                let path = PathBuf::from(r_cfg.root.as_deref().unwrap_or(&s_cfg.root))
                                    .join(&r_cfg.upload_dir);
                                conn.action = ActiveAction::Upload(path);
                                false
                            } else {
                                handle_error(&mut conn.response, HTTP_METHOD_NOT_ALLOWED, Some(&s_cfg));
                                conn.response.set_header("allow", &r_cfg.methods.join(", "));
                                true
                            }
                        }
                        Method::DELETE => {
                            handle_delete(&conn.request, &mut conn.response, r_cfg, &s_cfg);
                            true
                        }
                    }
                }
            }
            Err(RoutingError::MethodNotAllowed(allowed)) => {
                handle_error(&mut conn.response, HTTP_METHOD_NOT_ALLOWED, Some(&s_cfg));
                conn.response.set_header("allow", &allowed.join(", "));
                true
            }
            Err(RoutingError::NotFound) => {
                handle_error(&mut conn.response, HTTP_NOT_FOUND, Some(&s_cfg));
                true
            }
        };

        if done_now {
            conn.request.state = ParsingState::Complete;
        } else if is_chunked {
            conn.request.state = ParsingState::ChunkedBody;
        } else if content_length > 0 {
            conn.request.state = ParsingState::Body;
        } else if matches!(conn.action, ActiveAction::Cgi { .. }) {
            conn.request.state = ParsingState::Complete;
        } else {
            handle_error(&mut conn.response, HTTP_LENGTH_REQUIRED, Some(&s_cfg));
            conn.request.state = ParsingState::Complete;
        }

        let forced_close = conn.response.headers.get("connection").map(|v| v == "close").unwrap_or(false);
        conn.close_after_response = forced_close || client_wants_close;
        if !forced_close {
            conn.response.set_header("connection", if conn.close_after_response { "close" } else { "keep-alive" });
        }

        Ok(())
    }

    fn parse_request_line(&mut self) -> core::result::Result<(), ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            let request_line =
                std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;

            let parts: Vec<&str> = request_line.split_whitespace().collect();
            if parts.len() == 3 {
                self.method = Method::from_str(parts[0])?;
                self.url = parts[1].to_string();
                self.version = parts[2].to_string();

                self.cursor = abs_index + CRLN_LEN;
                self.state = ParsingState::Headers;
            } else {
                return Err(ParseError::MalformedRequestLine);
            }
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }
        Ok(())
    }

    fn extract_and_parse_header(
        &mut self,
    ) -> core::result::Result<Option<(String, String)>, ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            if line_bytes.is_empty() {
                self.cursor = abs_index + CRLN_LEN;
                return Ok(None);
            }
            let line =
                std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;
            self.cursor = abs_index + CRLN_LEN;
            if let Some(sep) = line.find(':') {
                let key = line[..sep].trim().to_string();
                let val = line[sep + 1..].trim().to_string();
                return Ok(Some((key.to_ascii_lowercase(), val)));
            }
            Err(ParseError::MalformedRequestLine)
        } else {
            Err(ParseError::IncompleteRequestLine)
        }
    }

    fn parse_headers(conn: &mut HttpConnection) -> core::result::Result<(), ParseError> {
        loop {
            let headers_option = conn.request.extract_and_parse_header()?;
            match headers_option {
                Some((k, v)) => conn.request.headers.insert(k, v),
                None => {
                    conn.request.buffer.drain(..conn.request.cursor);
                    conn.request.cursor = 0;
                    conn.request.state = ParsingState::HeadersDone;
                    return Ok(());
                }
            };
        }
    }

    pub fn parse_unchunked_body(
        poll: &Poll,
        conn: &mut HttpConnection,
    ) -> core::result::Result<(), ParseError> {
        if conn.s_cfg.is_some() {
            let available = conn.request.buffer.len() - conn.request.cursor;
            let to_process = std::cmp::min(available, conn.body_remaining);

            if to_process > 0 {
                match &mut conn.action {
                    ActiveAction::Cgi { in_stream, .. } => {
                        let data = conn.request.buffer.drain(..to_process).collect::<Vec<u8>>();
                        conn.cgi_buffer.extend_from_slice(&data);
                        conn.body_remaining -= to_process;

                        if let Some(in_token) = conn.cgi_in_token {
                            if let Some(pipe) = in_stream {
                                poll.registry().reregister(pipe, in_token, Interest::WRITABLE).ok();
                            }
                        }
                    }
                    _ => {
                        let start = conn.request.cursor;
                        execute_active_action(
                            &conn.request,
                            &mut conn.upload_manager,
                            &mut conn.action,
                            start,
                            to_process,
                            &conn.boundary,
                        )?;
                        conn.body_remaining -= to_process;
                        conn.request.buffer.drain(start..start + to_process);
                    }
                }
            }
        }

        if conn.body_remaining == 0 {
            conn.request.state = ParsingState::Complete;
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }
        Ok(())
    }

    pub fn parse_chunked_body(conn: &mut HttpConnection) -> core::result::Result<bool, ParseError> {
        let Some(s_cfg) = conn.s_cfg.clone() else {
            return Ok(true);
        };
        loop {
            match conn.request.chunk_state {
                ChunkState::ReadSize => {
                    let current_len = conn.request.buffer.len();
                    if current_len == 0 {
                        return Ok(false);
                    }

                    let search_limit = std::cmp::min(current_len, 18);
                    match find_subsequence(&conn.request.buffer[..search_limit], b"\r\n", 0) {
                        Some(line_end) => {
                            let line = String::from_utf8_lossy(&conn.request.buffer[..line_end]);
                            let size_part = line.split(';').next().unwrap_or("").trim();
                            let chunk_size = usize::from_str_radix(size_part, 16)
                                .map_err(|_| ParseError::ParseHexError)?;
                            if conn.total_body_read + chunk_size > s_cfg.client_max_body_size {
                                return Err(ParseError::PayloadTooLarge);
                            }

                            if chunk_size == 0 {
                                if conn.request.buffer.len() < line_end + 2 {
                                    return Ok(false);
                                }
                                conn.request.buffer.drain(..line_end + 2);
                                conn.request.chunk_state = ChunkState::ReadTrailers;
                                continue;
                            }

                            conn.request.chunk_state = ChunkState::ReadData(chunk_size);
                            conn.request.buffer.drain(..line_end + 2);
                        }
                        None => {
                            if current_len >= 18 {
                                return Err(ParseError::ParseHexError);
                            }
                            return Ok(false);
                        }
                    }
                }

                ChunkState::ReadData(remaining_size) => {
                    if conn.request.buffer.is_empty() {
                        return Ok(false);
                    }

                    let available = conn.request.buffer.len();
                    let to_read = std::cmp::min(available, remaining_size);
                    let data = conn.request.buffer.drain(..to_read).collect::<Vec<u8>>();

                    match &conn.action {
                        ActiveAction::Cgi { .. } => {
                            conn.cgi_buffer.extend_from_slice(&data);
                        }
                        ActiveAction::Upload(upload_path) => {
                            if conn.upload_manager.is_none() {
                                conn.upload_manager = Some(Upload::new(upload_path.clone(), &conn.boundary));
                            }
                            if let Some(mgr) = &mut conn.upload_manager {
                                if !conn.boundary.is_empty() {
                                    mgr.upload_body_with_boundry(&conn.request, &data);
                                } else {
                                    mgr.upload_simple_body(&conn.request, &data);
                                }
                            }
                        }
                        _ => {}
                    }

                    conn.total_body_read += to_read;
                    let new_remaining = remaining_size - to_read;

                    if new_remaining == 0 {
                        conn.request.chunk_state = ChunkState::ReadTrailingCRLF;
                    } else {
                        conn.request.chunk_state = ChunkState::ReadData(new_remaining);
                        return Ok(false);
                    }
                }

                ChunkState::ReadTrailingCRLF => {
                    if conn.request.buffer.len() < 2 {
                        return Ok(false);
                    }
                    if &conn.request.buffer[..2] != b"\r\n" {
                        return Err(ParseError::ParseHexError);
                    }
                    conn.request.buffer.drain(..2);
                    conn.request.chunk_state = ChunkState::ReadSize;
                }

                ChunkState::ReadTrailers => {
                    if conn.request.buffer.len() > 8192 {
                        return Err(ParseError::HeaderTooLong);
                    }
                    match conn.request.extract_and_parse_header() {
                        Ok(Some((k, v))) => {
                            if let Some(allowed_trailers) = conn.request.headers.get("trailer") {
                                if allowed_trailers.to_lowercase().contains(&k) {
                                    conn.request.trailers.insert(k, v);
                                }
                            }
                            continue;
                        }
                        Ok(None) => {
                            conn.request.buffer.drain(..conn.request.cursor);
                            conn.request.cursor = 0;
                            return Ok(true);
                        }
                        Err(ParseError::IncompleteRequestLine) => return Ok(false),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    pub fn extract_filename(&self) -> String {
        format!(
            "uploaded_{}",
            SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0)
        )
    }
}

fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    let search_area = buffer.get(start_offset..)?;
    let mut current_pos = 0;
    while let Some(r_pos) = search_area[current_pos..].iter().position(|&b| b == b'\r') {
        let abs_r_pos_in_search = current_pos + r_pos;
        if search_area.get(abs_r_pos_in_search + 1) == Some(&b'\n') {
            return Some(start_offset + abs_r_pos_in_search);
        }
        current_pos = abs_r_pos_in_search + 1;
    }
    None
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first_byte = needle[0];
    let mut current_pos = 0;

    while let Some(rel_pos) = search_area[current_pos..].iter().position(|&b| b == first_byte) {
        let abs_pos_in_search = current_pos + rel_pos;
        if let Some(candidate) = search_area.get(abs_pos_in_search..abs_pos_in_search + needle.len()) {
            if candidate == needle {
                return Some(start_offset + abs_pos_in_search);
            }
        } else {
            return None;
        }
        current_pos = abs_pos_in_search + 1;
    }
    None
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.method, self.url, self.version)?;
        for (key, value) in &self.headers {
            writeln!(f, "  {key}: {value}")?;
        }
        if !self.body.is_empty() {
            write!(f, "Body ({} bytes)", self.body.len())
        } else {
            write!(f, "Body: <empty>")
        }
    }
}

#[derive(Debug, Default)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo {
        name: String::new(),
        filename: None,
        content_type: String::new(),
    };

    for line in headers.lines() {
        if line.starts_with("Content-Disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n.split('=').nth(1).unwrap_or("").trim_matches('"').to_string();
            }
            if let Some(f) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(f.split('=').nth(1).unwrap_or("").trim_matches('"').to_string());
            }
        } else if line.starts_with("Content-Type:") {
            info.content_type = line.split(':').nth(1).unwrap_or("text/plain").trim().to_string();
        }
    }
    info
}

/// Spawns the CGI child and wires its stdio pipes into the event loop.
/// `Err(())` signals spawn failure; the caller maps that to a 500.
fn start_cgi(
    conn: &mut HttpConnection,
    s_cfg: &Arc<ServerConfig>,
    r_cfg: &RouteConfig,
    poll: &Poll,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    client_token: Token,
) -> std::result::Result<(), ()> {
    let program = match &r_cfg.cgi_path {
        Some(p) => p.clone(),
        None => {
            let ext = r_cfg.cgi_ext.as_deref().unwrap_or("");
            crate::config::validate::resolve_interpreter(ext)
                .map(str::to_string)
                .unwrap_or_else(|| ext.trim_start_matches('.').to_string())
        }
    };

    let root = r_cfg.root.as_deref().unwrap_or(&s_cfg.root);
    let full_script_path = PathBuf::from(root).join(conn.request.url.trim_start_matches('/'));

    let Ok((server_out_std, script_out_std)) = UnixStream::pair() else {
        return Err(());
    };
    server_out_std.set_nonblocking(true).ok();
    let mut server_out_mio = mio::net::UnixStream::from_std(server_out_std);

    let Ok((server_in_std, script_in_std)) = UnixStream::pair() else {
        return Err(());
    };
    server_in_std.set_nonblocking(true).ok();
    let mut server_in_mio = mio::net::UnixStream::from_std(server_in_std);

    let script_output_file = unsafe { File::from_raw_fd(script_out_std.into_raw_fd()) };
    let script_input_file = unsafe { File::from_raw_fd(script_in_std.into_raw_fd()) };

    let mut cmd = Command::new(&program);
    cmd.arg(&full_script_path)
        .envs(build_cgi_env(conn, s_cfg, r_cfg, &full_script_path))
        .stdin(Stdio::from(script_input_file))
        .stdout(Stdio::from(script_output_file))
        .stderr(Stdio::inherit());

    match cmd.spawn() {
        Ok(child) => {
            let out_token = Token(*next_token);
            *next_token += 1;
            poll.registry().register(&mut server_out_mio, out_token, Interest::READABLE).ok();

            let in_token = Token(*next_token);
            *next_token += 1;
            poll.registry().register(&mut server_in_mio, in_token, Interest::WRITABLE).ok();

            conn.cgi_out_token = Some(out_token);
            conn.cgi_in_token = Some(in_token);

            conn.action = ActiveAction::Cgi {
                out_stream: server_out_mio,
                in_stream: Some(server_in_mio),
                child,
                parse_state: CgiParsingState::ReadHeaders,
                header_buf: Vec::new(),
                stdout_buf: Vec::new(),
                status: HTTP_OK,
                extra_headers: Vec::new(),
                start_time: Instant::now(),
            };

            cgi_to_client.insert(out_token, client_token);
            cgi_to_client.insert(in_token, client_token);
            debug!("spawned CGI program '{program}' for {}", conn.request.url);
            Ok(())
        }
        Err(e) => {
            error!("failed to spawn CGI program '{program}': {e}");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request_line() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html HTTP/1.1\r\n");
        req.parse_request_line().unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/index.html");
        assert_eq!(req.state, ParsingState::Headers);
    }

    #[test]
    fn incomplete_request_line_is_reported() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html ");
        assert_eq!(req.parse_request_line().unwrap_err(), ParseError::IncompleteRequestLine);
    }

    #[test]
    fn rejects_unknown_method() {
        assert_eq!(Method::from_str("PATCH").unwrap_err(), ParseError::InvalidMethod);
    }

    #[test]
    fn head_is_allowed_by_a_get_route() {
        let head = Method::HEAD;
        assert!(head.is_allowed(&["GET".to_string()]));
        assert!(!head.is_allowed(&["POST".to_string()]));
    }

    #[test]
    fn malformed_request_line_without_three_parts_is_rejected() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html\r\n");
        assert_eq!(req.parse_request_line().unwrap_err(), ParseError::MalformedRequestLine);
    }

    #[test]
    fn find_subsequence_locates_needle_mid_buffer() {
        let haystack = b"abc\r\n\r\ndef";
        assert_eq!(find_subsequence(haystack, b"\r\n\r\n", 0), Some(3));
        assert_eq!(find_subsequence(haystack, b"zzz", 0), None);
    }

    #[test]
    fn parses_multipart_part_headers() {
        let headers = "Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain";
        let info = parse_part_headers(headers);
        assert_eq!(info.name, "file");
        assert_eq!(info.filename.as_deref(), Some("a.txt"));
        assert_eq!(info.content_type, "text/plain");
    }
}
