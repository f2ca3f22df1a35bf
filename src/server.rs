use crate::prelude::*;
use mio::net::TcpListener;
use mio::Events;
use std::collections::HashMap as Map;
use std::net::SocketAddr;
use std::process::Child;

/// Owns every listener, connection, and piece of CGI plumbing driven by a
/// single `mio::Poll`. One `Server` runs the whole process.
pub struct Server {
    pub listeners: Map<Token, TcpListener>,
    pub listener_vhosts: Map<Token, Vec<Arc<ServerConfig>>>,
    pub connections: Map<Token, HttpConnection>,
    pub cgi_to_client: Map<Token, Token>,
    pub zombie_purgatory: Vec<Child>,
    pub session_store: SessionStore,
    next_token: usize,
    running: bool,
}

impl Server {
    pub fn new(configs: Vec<ServerConfig>) -> Result<Self> {
        let configs: Vec<Arc<ServerConfig>> = configs.into_iter().map(Arc::new).collect();

        let mut by_addr: Map<(String, u16), Vec<Arc<ServerConfig>>> = Map::new();
        for cfg in &configs {
            for port in &cfg.ports {
                by_addr.entry((cfg.host.clone(), *port)).or_default().push(Arc::clone(cfg));
            }
        }

        let mut listeners = Map::new();
        let mut listener_vhosts = Map::new();
        let mut next_token = 0usize;

        for ((host, port), vhosts) in by_addr {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let std_listener = std::net::TcpListener::bind(addr).map_err(crate::error::ServerError::Bind)?;
            std_listener.set_nonblocking(true)?;
            let listener = TcpListener::from_std(std_listener);

            let token = Token(next_token);
            next_token += 1;
            info!("listening on {host}:{port} ({} vhost(s))", vhosts.len());
            listeners.insert(token, listener);
            listener_vhosts.insert(token, vhosts);
        }

        let ttl = crate::config::types::DEFAULT_IDLE_SESSION_SECS;

        Ok(Self {
            listeners,
            listener_vhosts,
            connections: Map::new(),
            cgi_to_client: Map::new(),
            zombie_purgatory: Vec::new(),
            session_store: SessionStore::new(ttl),
            next_token,
            running: true,
        })
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn run(&mut self) -> Result<()> {
        let mut poll = Poll::new()?;
        for (token, listener) in self.listeners.iter_mut() {
            poll.registry().register(listener, *token, Interest::READABLE)?;
        }

        let mut shutdown = register_shutdown_signal(&mut poll)?;

        let mut events = Events::with_capacity(1024);
        while self.running {
            match poll.poll(&mut events, Some(Duration::from_millis(250))) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();

                if token == SIGNAL_TOKEN {
                    if let Some(signals) = &mut shutdown {
                        for signal in signals.pending() {
                            info!("received signal {signal}, draining and exiting");
                        }
                    }
                    self.running = false;
                    continue;
                }

                if self.listeners.contains_key(&token) {
                    self.accept_loop(&poll, token)?;
                    continue;
                }

                if let Some(client_token) = self.cgi_to_client.get(&token).copied() {
                    if let Some(conn) = self.connections.get_mut(&client_token) {
                        handle_cgi_event(&poll, &event, token, client_token, conn, &mut self.cgi_to_client)?;
                        if conn.should_close() {
                            HttpConnection::terminate_connection(self, client_token);
                        }
                    }
                    continue;
                }

                self.handle_connection_event(&poll, token, &event)?;
            }

            timeouts::process(self, &poll);
        }

        Ok(())
    }

    fn accept_loop(&mut self, poll: &Poll, listener_token: Token) -> Result<()> {
        loop {
            let accepted = {
                let listener = self.listeners.get_mut(&listener_token).unwrap();
                listener.accept()
            };
            match accepted {
                Ok((mut stream, remote_addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    poll.registry().register(&mut stream, token, Interest::READABLE)?;

                    let vhosts = self.listener_vhosts.get(&listener_token).unwrap().clone();
                    self.connections.insert(token, HttpConnection::new(stream, remote_addr, vhosts));
                    trace!("accepted connection {token:?} from {remote_addr}");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept() failed: {e}");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_connection_event(&mut self, poll: &Poll, token: Token, event: &Event) -> Result<()> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Ok(());
        };

        if event.is_readable() {
            HttpConnection::handle_read_phase(
                conn,
                poll,
                token,
                &mut self.next_token,
                &mut self.cgi_to_client,
                &mut self.session_store,
            )?;
        }

        if event.is_writable() {
            if let Some(conn) = self.connections.get_mut(&token) {
                HttpConnection::handle_write_phase(
                    conn,
                    poll,
                    token,
                    &mut self.next_token,
                    &mut self.cgi_to_client,
                    &mut self.session_store,
                )?;
            }
        }

        if let Some(conn) = self.connections.get(&token) {
            if conn.should_close() {
                HttpConnection::terminate_connection(self, token);
            }
        }

        Ok(())
    }
}

const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);

fn register_shutdown_signal(poll: &mut Poll) -> Result<Option<signal_hook_mio::v1_0::Signals>> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    let mut signals = signal_hook_mio::v1_0::Signals::new([SIGINT, SIGTERM])?;
    poll.registry().register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)?;
    Ok(Some(signals))
}

use crate::timeouts;
