use crate::prelude::*;

#[derive(Debug)]
pub struct HttpConnection {
    pub stream: TcpStream,
    pub remote_addr: std::net::SocketAddr,
    pub write_buffer: Vec<u8>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub config_list: Vec<Arc<ServerConfig>>,
    pub s_cfg: Option<Arc<ServerConfig>>,
    pub action: ActiveAction,
    pub upload_manager: Option<Upload>,
    pub total_body_read: usize,
    pub body_remaining: usize,
    pub boundary: String,
    pub closed: bool,
    pub cgi_in_token: Option<Token>,
    pub cgi_out_token: Option<Token>,
    pub cgi_buffer: Vec<u8>,
    pub session_id: Option<String>,
    pub last_activity: Instant,
    /// Keep-alive decision for the response currently in flight, derived in
    /// `setup_action` from the request's HTTP version and `Connection`
    /// header. The socket is closed once `write_buffer` drains with this set.
    pub close_after_response: bool,
}

#[derive(Debug)]
pub enum ActiveAction {
    Upload(PathBuf),
    FileDownload(File, usize),
    Cgi {
        out_stream: mio::net::UnixStream,
        in_stream: Option<mio::net::UnixStream>,
        child: std::process::Child,
        parse_state: CgiParsingState,
        header_buf: Vec<u8>,
        /// Script stdout accumulated after the header block, flushed as a
        /// single framed response once stdout hits EOF.
        stdout_buf: Vec<u8>,
        status: u16,
        extra_headers: Vec<(String, String)>,
        start_time: Instant,
    },
    Discard,
    None,
}

impl HttpConnection {
    pub fn new(stream: TcpStream, remote_addr: std::net::SocketAddr, config_list: Vec<Arc<ServerConfig>>) -> Self {
        Self {
            stream,
            remote_addr,
            write_buffer: Vec::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(HTTP_OK, HttpResponse::status_text(HTTP_OK)),
            upload_manager: None,
            config_list,
            s_cfg: None,
            action: ActiveAction::None,
            total_body_read: 0,
            body_remaining: 0,
            boundary: String::new(),
            closed: false,
            cgi_in_token: None,
            cgi_out_token: None,
            cgi_buffer: Vec::new(),
            session_id: None,
            last_activity: Instant::now(),
            close_after_response: false,
        }
    }

    pub fn should_close(&self) -> bool {
        self.closed && self.write_buffer.is_empty() && self.cgi_buffer.is_empty()
    }

    /// Picks the vhost matching the request's `Host` header, falling back to
    /// whichever server block set `default_server`, then the first block
    /// bound for this listener.
    pub fn resolve_config(&self) -> Arc<ServerConfig> {
        if let Some(host_header) = self.request.headers.get("host") {
            let hostname = host_header.split(':').next().unwrap_or("");
            for config in &self.config_list {
                if config.names().iter().any(|n| *n == hostname) {
                    return Arc::clone(config);
                }
            }
        }

        for config in &self.config_list {
            if config.default_server {
                return Arc::clone(config);
            }
        }

        Arc::clone(&self.config_list[0])
    }

    pub fn read_data(&mut self) -> core::result::Result<bool, ParseError> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    self.request.buffer.extend_from_slice(&buf[..n]);
                    if self.request.buffer.len() >= MAX_READ_DATA / 2 {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return Ok(true),
            }
        }
        Ok(false)
    }

    pub fn write_data(&mut self) -> bool {
        match self.stream.write(&self.write_buffer) {
            Ok(n) => {
                self.write_buffer.drain(..n);
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl HttpConnection {
    /// Reads data from the client socket and dispatches it to the request
    /// parser. Drains the socket, tracks EOF/error as a close, applies CGI
    /// backpressure by switching interest to writable once the inbound
    /// buffer grows past `MAX_READ_DATA`, then parses whatever is pending.
    pub fn handle_read_phase(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        session_store: &mut SessionStore,
    ) -> Result<()> {
        conn.touch();
        match conn.read_data() {
            Ok(is_eof) => conn.closed = is_eof,
            Err(_) => conn.closed = true,
        }

        let mut interest = Interest::READABLE;
        if matches!(conn.action, ActiveAction::Cgi { .. }) && conn.request.buffer.len() > MAX_READ_DATA {
            interest = Interest::WRITABLE;
        }
        poll.registry().reregister(&mut conn.stream, token, interest)?;

        if !conn.closed && !conn.request.buffer.is_empty() {
            conn.closed =
                HttpRequest::proces_request(poll, token, next_token, cgi_to_client, conn, session_store)?;
        }
        Ok(())
    }

    /// Manages data egress: refills the write buffer from an in-flight file
    /// download when empty, flushes to the socket, and on a fully drained
    /// buffer either starts the next pipelined request or rearms for
    /// keep-alive.
    pub fn handle_write_phase(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        session_store: &mut SessionStore,
    ) -> Result<()> {
        if conn.write_buffer.is_empty() {
            if let ActiveAction::FileDownload(ref mut file, ref mut remaining) = conn.action {
                let mut chunk = vec![0u8; 8192];
                match file.read(&mut chunk) {
                    Ok(0) => conn.action = ActiveAction::None,
                    Ok(n) => {
                        conn.write_buffer.extend_from_slice(&chunk[..n]);
                        *remaining -= n;
                    }
                    Err(_) => conn.closed = true,
                }
            }
        }

        if !conn.write_buffer.is_empty() {
            conn.closed = conn.write_data() || conn.closed;
        }

        if !conn.closed && conn.write_buffer.is_empty() {
            if conn.close_after_response {
                conn.closed = true;
            } else {
                HttpConnection::handle_post_write_update(conn, poll, token, next_token, cgi_to_client, session_store)?;
            }
        }

        Ok(())
    }

    /// After a full flush: resets the response for the next request cycle
    /// and, if pipelined bytes are already sitting in the inbound buffer,
    /// immediately parses the next request rather than waiting on another
    /// readable event.
    pub fn handle_post_write_update(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        session_store: &mut SessionStore,
    ) -> Result<()> {
        let mut interest = Interest::READABLE;
        if matches!(conn.action, ActiveAction::FileDownload(_, _)) {
            interest |= Interest::WRITABLE;
        }

        conn.response = HttpResponse::new(HTTP_OK, HttpResponse::status_text(HTTP_OK));
        poll.registry().reregister(&mut conn.stream, token, interest)?;

        if !conn.request.buffer.is_empty() && conn.request.state == ParsingState::RequestLine {
            debug!("pipelined data detected on {token:?}, parsing immediately");
            conn.closed =
                HttpRequest::proces_request(poll, token, next_token, cgi_to_client, conn, session_store)?;
        }

        Ok(())
    }

    /// Removes a connection and reaps its CGI child if one is running,
    /// parking un-reaped children in the purgatory list to avoid zombies.
    pub fn terminate_connection(server: &mut Server, token: Token) {
        if let Some(mut conn) = server.connections.remove(&token) {
            debug!("closing connection {token:?}");
            let action = std::mem::replace(&mut conn.action, ActiveAction::None);

            if let ActiveAction::Cgi { mut child, .. } = action {
                let _ = child.kill();
                if let Ok(None) = child.try_wait() {
                    server.zombie_purgatory.push(child);
                }
                cleanup_cgi(&mut server.cgi_to_client, &mut conn);
            }
        }
    }
}
