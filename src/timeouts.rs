use crate::prelude::*;

/// Per-tick maintenance: closes idle connections, kills CGI children that
/// have overrun their budget, and periodically sweeps expired sessions.
pub fn process(server: &mut Server, poll: &Poll) {
    let now = Instant::now();

    let mut to_remove = Vec::new();
    for (token, conn) in server.connections.iter_mut() {
        if now.duration_since(conn.last_activity) > CLIENT_TIMEOUT {
            let mid_request = conn.request.state != ParsingState::RequestLine || !conn.request.buffer.is_empty();
            if mid_request {
                warn!("connection {token:?} timed out mid-request, sending 408");
                handle_error(&mut conn.response, HTTP_REQUEST_TIMEOUT, conn.s_cfg.as_ref());
                let bytes = conn.response.to_bytes();
                let _ = conn.stream.write_all(&bytes);
            } else {
                debug!("connection {token:?} idle timeout, closing");
            }
            cleanup_connection(conn, poll);
            force_cgi_timeout(conn, &mut server.cgi_to_client);
            to_remove.push(*token);
            continue;
        }

        if let ActiveAction::Cgi { start_time, .. } = &conn.action {
            if start_time.elapsed().as_secs() > TIMEOUT_CGI {
                warn!("connection {token:?} CGI execution timed out, killing");
                force_cgi_timeout(conn, &mut server.cgi_to_client);
                poll.registry().reregister(&mut conn.stream, *token, Interest::WRITABLE).ok();
            }
        }
    }
    for token in to_remove {
        server.connections.remove(&token);
    }

    if server.session_store.last_cleanup.elapsed() > Duration::from_secs(CLEAN_UP) {
        server.session_store.cleanup();
    }

    server.zombie_purgatory.retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
}

fn cleanup_connection(conn: &mut HttpConnection, poll: &Poll) {
    let _ = poll.registry().deregister(&mut conn.stream);
    let _ = conn.stream.shutdown(Shutdown::Both);
}
