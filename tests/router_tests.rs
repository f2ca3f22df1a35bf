use webserv::config::{RouteConfig, ServerConfig};
use webserv::http::Method;
use webserv::router::RoutingError;

fn cfg_with_routes(routes: Vec<RouteConfig>) -> ServerConfig {
    ServerConfig {
        routes,
        ..ServerConfig::default()
    }
}

fn route(path: &str, methods: &[&str]) -> RouteConfig {
    RouteConfig {
        path: path.to_string(),
        methods: methods.iter().map(|m| m.to_string()).collect(),
        ..RouteConfig::default()
    }
}

#[test]
fn simple_match_on_root() {
    let cfg = cfg_with_routes(vec![route("/", &["GET"])]);
    let found = cfg.find_route("/", &Method::GET).unwrap();
    assert_eq!(found.path, "/");
}

#[test]
fn falls_back_to_root_when_nothing_more_specific_matches() {
    let cfg = cfg_with_routes(vec![route("/", &["GET"])]);
    let found = cfg.find_route("/unconfigured", &Method::GET).unwrap();
    assert_eq!(found.path, "/");
}

#[test]
fn longest_prefix_wins() {
    let cfg = cfg_with_routes(vec![route("/a", &["GET"]), route("/a/b", &["GET"])]);
    let found = cfg.find_route("/a/b/c", &Method::GET).unwrap();
    assert_eq!(found.path, "/a/b");
}

#[test]
fn disallowed_method_on_matched_path_is_rejected() {
    let cfg = cfg_with_routes(vec![route("/", &["GET"])]);
    let err = cfg.find_route("/", &Method::POST).unwrap_err();
    assert_eq!(err, RoutingError::MethodNotAllowed);
}

#[test]
fn unmatched_path_with_no_routes_is_not_found() {
    let cfg = cfg_with_routes(vec![route("/a", &["GET"])]);
    let err = cfg.find_route("/b", &Method::GET).unwrap_err();
    assert_eq!(err, RoutingError::NotFound);
}

#[test]
fn query_string_is_ignored_for_matching() {
    let cfg = cfg_with_routes(vec![route("/search", &["GET"])]);
    let found = cfg.find_route("/search?q=rust", &Method::GET).unwrap();
    assert_eq!(found.path, "/search");
}
