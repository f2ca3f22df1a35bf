use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use webserv::config::{RouteConfig, ServerConfig};

fn spawn_server(config: ServerConfig) {
    thread::spawn(move || {
        let mut server = webserv::Server::new(vec![config]).expect("server should bind");
        server.run().expect("server loop should not error");
    });
    thread::sleep(Duration::from_millis(300));
}

#[test]
fn chunked_upload_is_reassembled_on_disk() {
    let test_root = std::env::temp_dir().join("webserv-it-chunked");
    let upload_path = test_root.join("uploads");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&upload_path).unwrap();

    let route = RouteConfig {
        path: "/upload".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        upload_dir: "uploads".to_string(),
        methods: vec!["POST".to_string(), "GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58101],
        server_name: "127.0.0.1".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        client_max_body_size: 1024 * 1024,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58101").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let headers = "POST /upload/test.txt HTTP/1.1\r\n\
                   Host: 127.0.0.1:58101\r\n\
                   Transfer-Encoding: chunked\r\n\
                   Content-Type: text/plain\r\n\r\n";
    stream.write_all(headers.as_bytes()).unwrap();
    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"0\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).expect("read response");
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("201 Created"), "unexpected response: {response}");

    let found_content = fs::read_dir(&upload_path)
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| fs::read_to_string(e.path()).map(|c| c == "Hello World!").unwrap_or(false));
    assert!(found_content, "chunked data was not correctly assembled on disk");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn pipelined_requests_both_get_a_response() {
    let test_root = std::env::temp_dir().join("webserv-it-pipeline");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58102],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58102").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipeline_data = "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n\
                         GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
    stream.write_all(pipeline_data.as_bytes()).unwrap();

    let mut buffer = [0u8; 4096];
    let n1 = stream.read(&mut buffer).unwrap();
    let res1 = String::from_utf8_lossy(&buffer[..n1]);
    assert!(res1.contains("200 OK"), "first response was not 200 OK: {res1}");

    if res1.matches("HTTP/1.1").count() < 2 {
        let n2 = stream.read(&mut buffer).unwrap();
        let res2 = String::from_utf8_lossy(&buffer[..n2]);
        assert!(res2.contains("200 OK"), "second response was not 200 OK: {res2}");
    }

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn head_request_carries_length_without_a_body() {
    let test_root = std::env::temp_dir().join("webserv-it-head");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello, HEAD!").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string(), "HEAD".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58103],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58103").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"HEAD /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("200 OK"));
    assert!(response.contains("Content-Length: 12"));
    assert!(response.ends_with("\r\n\r\n"), "HEAD response must not carry a body: {response}");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn second_upload_to_same_name_overwrites_and_returns_200() {
    let test_root = std::env::temp_dir().join("webserv-it-overwrite");
    let upload_path = test_root.join("uploads");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&upload_path).unwrap();

    let route = RouteConfig {
        path: "/upload".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        upload_dir: "uploads".to_string(),
        methods: vec!["POST".to_string(), "GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58105],
        server_name: "127.0.0.1".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        client_max_body_size: 1024 * 1024,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let put_once = |body: &'static [u8]| -> String {
        let mut stream = TcpStream::connect("127.0.0.1:58105").expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let headers = format!(
            "POST /upload/same.txt HTTP/1.1\r\n\
             Host: 127.0.0.1:58105\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(headers.as_bytes()).unwrap();
        stream.write_all(body).unwrap();
        stream.flush().unwrap();
        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).expect("read response");
        String::from_utf8_lossy(&buffer[..n]).into_owned()
    };

    let first = put_once(b"first upload");
    assert!(first.contains("201 Created"), "first upload should be 201: {first}");

    let second = put_once(b"second upload, shorter");
    assert!(second.contains("200 OK"), "overwrite should be 200: {second}");

    let saved = fs::read_to_string(upload_path.join("same.txt")).unwrap();
    assert_eq!(saved, "second upload, shorter", "overwrite must replace, not append");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn get_request_with_dot_dot_segments_is_rejected() {
    let test_root = std::env::temp_dir().join("webserv-it-traversal");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(test_root.join("www")).unwrap();
    fs::write(test_root.join("secret.txt"), "top secret").unwrap();
    fs::write(test_root.join("www").join("index.html"), "public").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.join("www").to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58106],
        server_name: "localhost".to_string(),
        root: test_root.join("www").to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58106").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"GET /../secret.txt HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("403"), "path traversal should be forbidden, got: {response}");
    assert!(!response.contains("top secret"), "must never leak file outside root: {response}");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn post_upload_without_length_or_chunking_gets_411() {
    let test_root = std::env::temp_dir().join("webserv-it-411");
    let upload_path = test_root.join("uploads");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&upload_path).unwrap();

    let route = RouteConfig {
        path: "/upload".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        upload_dir: "uploads".to_string(),
        methods: vec!["POST".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58107],
        server_name: "127.0.0.1".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58107").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"POST /upload/whatever.txt HTTP/1.1\r\nHost: 127.0.0.1:58107\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("411"), "expected 411 Length Required, got: {response}");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn method_not_allowed_response_carries_allow_header() {
    let test_root = std::env::temp_dir().join("webserv-it-405");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58108],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58108").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"DELETE /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("405"), "expected 405, got: {response}");
    assert!(response.to_lowercase().contains("allow: get"), "405 must carry Allow header: {response}");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn http_1_0_request_without_keep_alive_closes_after_response() {
    let test_root = std::env::temp_dir().join("webserv-it-http10-close");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58109],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58109").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.0\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("200 OK"));
    assert!(response.to_lowercase().contains("connection: close"), "HTTP/1.0 without keep-alive must close: {response}");

    let mut rest = Vec::new();
    let closed = matches!(stream.read_to_end(&mut rest), Ok(0));
    assert!(closed, "server must actually close the socket after an HTTP/1.0 response");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn unsupported_http_version_gets_505() {
    let test_root = std::env::temp_dir().join("webserv-it-505");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello").unwrap();

    let route = RouteConfig {
        path: "/".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58110],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58110").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"GET /index.html HTTP/2.0\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("505"), "expected 505 HTTP Version Not Supported, got: {response}");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn unmatched_route_returns_404() {
    let test_root = std::env::temp_dir().join("webserv-it-404");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();

    let route = RouteConfig {
        path: "/known".to_string(),
        root: Some(test_root.to_str().unwrap().to_string()),
        methods: vec!["GET".to_string()],
        ..RouteConfig::default()
    };
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: vec![58104],
        server_name: "localhost".to_string(),
        root: test_root.to_str().unwrap().to_string(),
        routes: vec![route],
        default_server: true,
        ..ServerConfig::default()
    };
    spawn_server(config);

    let mut stream = TcpStream::connect("127.0.0.1:58104").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"GET /nowhere HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).unwrap();
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("404"), "expected a 404, got: {response}");

    let _ = fs::remove_dir_all(&test_root);
}
