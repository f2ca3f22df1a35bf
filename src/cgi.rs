use crate::prelude::*;
use std::path::Path;

#[derive(Debug, PartialEq)]
pub enum CgiParsingState {
    ReadHeaders,
    StreamBody,
}

pub fn parse_cgi_headers(bytes: &[u8]) -> (u16, Vec<(String, String)>) {
    let mut status = 200;
    let mut headers = Vec::new();
    let content = String::from_utf8_lossy(bytes);

    for line in content.lines() {
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();

            if key == "status" {
                status = val.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
            } else {
                headers.push((key, val));
            }
        }
    }
    (status, headers)
}

pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) -> Result<()> {
    if let ActiveAction::Cgi {
        out_stream,
        in_stream,
        child,
        parse_state,
        header_buf,
        stdout_buf,
        status,
        extra_headers,
        ..
    } = &mut conn.action
    {
        if event.is_readable() && Some(cgi_token) == conn.cgi_out_token {
            let mut buf = [0u8; 4096];
            match out_stream.read(&mut buf) {
                Ok(0) => {
                    let mut response = match parse_state {
                        CgiParsingState::ReadHeaders => {
                            warn!("CGI script closed stdout before sending a full header block");
                            let mut res = HttpResponse::new(HTTP_BAD_GATEWAY, HttpResponse::status_text(HTTP_BAD_GATEWAY));
                            res.set_body(b"Error: malformed CGI response headers".to_vec(), "text/plain");
                            res
                        }
                        CgiParsingState::StreamBody => {
                            finalize_cgi_response(*status, std::mem::take(extra_headers), std::mem::take(stdout_buf))
                        }
                    };
                    if !response.headers.contains_key("connection") {
                        response.set_header("connection", if conn.close_after_response { "close" } else { "keep-alive" });
                    }
                    conn.write_buffer.extend_from_slice(&response.to_bytes());
                    poll.registry().reregister(
                        &mut conn.stream,
                        client_token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                    conn.cgi_out_token = None;
                }
                Ok(n) => {
                    trace!("read {n} bytes from CGI stdout");
                    process_cgi_stdout(parse_state, header_buf, status, extra_headers, stdout_buf, &buf[..n]);
                    poll.registry().reregister(
                        &mut conn.stream,
                        client_token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => conn.closed = true,
            }
        }

        if event.is_writable() && Some(cgi_token) == conn.cgi_in_token {
            if !conn.cgi_buffer.is_empty() {
                if let Some(pipe) = in_stream {
                    match pipe.write(&conn.cgi_buffer) {
                        Ok(n) => {
                            conn.cgi_buffer.drain(..n);
                            if conn.cgi_buffer.len() < 65536 {
                                poll.registry().reregister(
                                    &mut conn.stream,
                                    client_token,
                                    Interest::READABLE | Interest::WRITABLE,
                                )?;
                            }
                            if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                                conn.cgi_in_token = None;
                                trace!("CGI stdin pipe closed (EOF sent)");
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(_) => conn.closed = true,
                    }
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("CGI child exited with {status}");
                if let ActiveAction::Cgi { in_stream, .. } = &mut conn.action {
                    if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                        if let Some(pipe) = in_stream.take() {
                            drop(pipe);
                            conn.cgi_in_token = None;
                        }
                    }
                }
                cleanup_cgi(cgi_to_client, conn);
                conn.action = ActiveAction::None;
            }
            Ok(None) => {}
            Err(_) => conn.closed = true,
        }
    }
    Ok(())
}

/// Builds the CGI environment per the common-gateway-interface minimum set:
/// request line metadata, content headers, remote address, and every
/// client header reflected as `HTTP_*`.
pub fn build_cgi_env(
    conn: &HttpConnection,
    s_cfg: &ServerConfig,
    r_cfg: &RouteConfig,
    script_path: &Path,
) -> HashMap<String, String> {
    let req = &conn.request;
    let mut envs = HashMap::new();

    let (path_only, query) = match req.url.split_once('?') {
        Some((p, q)) => (p, q),
        None => (req.url.as_str(), ""),
    };

    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    envs.insert("SERVER_NAME".to_string(), s_cfg.server_name.clone());
    envs.insert("SERVER_PORT".to_string(), s_cfg.ports.first().copied().unwrap_or(0).to_string());
    envs.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    envs.insert("REQUEST_URI".to_string(), req.url.clone());
    envs.insert("PATH_INFO".to_string(), path_only.to_string());
    envs.insert("SCRIPT_NAME".to_string(), path_only.to_string());
    envs.insert(
        "SCRIPT_FILENAME".to_string(),
        script_path.to_string_lossy().into_owned(),
    );
    envs.insert("QUERY_STRING".to_string(), query.to_string());
    envs.insert("DOCUMENT_ROOT".to_string(), r_cfg.root.clone().unwrap_or_else(|| s_cfg.root.clone()));
    envs.insert("REDIRECT_STATUS".to_string(), "200".to_string());

    envs.insert("REMOTE_ADDR".to_string(), conn.remote_addr.ip().to_string());
    envs.insert("REMOTE_PORT".to_string(), conn.remote_addr.port().to_string());

    if let Some(ct) = req.headers.get("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.clone());
    }
    if let Some(cl) = req.headers.get("content-length") {
        envs.insert("CONTENT_LENGTH".to_string(), cl.clone());
    }

    for (k, v) in req.headers.iter().chain(&req.trailers) {
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }

    envs
}

/// Feeds a chunk of CGI stdout into the header parser or the accumulated
/// body buffer. Nothing is written to the client until the whole script
/// output is collected and finalized (see `finalize_cgi_response`) — CGI
/// responses are never streamed or chunk-encoded.
pub fn process_cgi_stdout(
    parse_state: &mut CgiParsingState,
    header_buf: &mut Vec<u8>,
    status: &mut u16,
    extra_headers: &mut Vec<(String, String)>,
    stdout_buf: &mut Vec<u8>,
    new_data: &[u8],
) {
    match parse_state {
        CgiParsingState::ReadHeaders => {
            header_buf.extend_from_slice(new_data);

            if let Some(pos) = find_subsequence(header_buf, b"\r\n\r\n", 0)
                .or_else(|| find_subsequence(header_buf, b"\n\n", 0))
            {
                let is_crlf = header_buf.contains(&b'\r');
                let delimiter_len = if is_crlf { 4 } else { 2 };

                let header_bytes = header_buf[..pos].to_vec();
                let body_start = header_buf[pos + delimiter_len..].to_vec();

                let (parsed_status, cgi_headers) = parse_cgi_headers(&header_bytes);
                *status = parsed_status;
                *extra_headers = cgi_headers;
                stdout_buf.extend_from_slice(&body_start);
                *parse_state = CgiParsingState::StreamBody;
            }
        }
        CgiParsingState::StreamBody => {
            stdout_buf.extend_from_slice(new_data);
        }
    }
}

/// Builds the single, fully framed response for a finished CGI script:
/// the parsed status and headers from its output, a body made of every
/// accumulated stdout byte, and a `Content-Length` computed from that body.
fn finalize_cgi_response(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> HttpResponse {
    let mut res = HttpResponse::new(status, HttpResponse::status_text(status));
    res.headers.remove("content-length");
    for (k, v) in headers {
        res.set_header(&k, &v);
    }
    let content_type = res.headers.get("content-type").cloned().unwrap_or_else(|| "text/plain".to_string());
    res.set_body(body, &content_type);
    res
}

pub fn cleanup_cgi(cgi_to_client: &mut HashMap<Token, Token>, conn: &mut HttpConnection) {
    if let Some(t) = conn.cgi_out_token.take() {
        cgi_to_client.remove(&t);
    }
    if let Some(t) = conn.cgi_in_token.take() {
        cgi_to_client.remove(&t);
    }
}

/// Kills a CGI child that overran its execution budget. Since nothing is
/// written to the client before `finalize_cgi_response` runs at stdout EOF,
/// it is always safe to synthesize a fresh 504 here without risking
/// framing corruption on output already in flight.
pub fn force_cgi_timeout(conn: &mut HttpConnection, cgi_to_client: &mut HashMap<Token, Token>) {
    if let ActiveAction::Cgi { ref mut child, .. } = conn.action {
        let _ = child.kill();
        let _ = child.wait();

        let mut res = HttpResponse::new(GATEWAY_TIMEOUT, HttpResponse::status_text(GATEWAY_TIMEOUT));
        res.set_header("connection", "close");
        conn.write_buffer.extend_from_slice(&res.to_bytes());

        conn.cgi_in_token = None;
        conn.cgi_out_token = None;
        conn.cgi_buffer.clear();
        conn.close_after_response = true;
        conn.closed = true;

        cleanup_cgi(cgi_to_client, conn);
        conn.action = ActiveAction::None;
    }
}
