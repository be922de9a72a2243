//! Integration coverage for [`zaver::pathmap`]'s URI dispatch: the
//! `/cgi-bin/` prefix check, the docroot containment boundary, and the
//! `/index.html` heuristic, driven against a real temp-directory docroot.
//! Dispatch here is purely on the URI prefix `/cgi-bin/` vs. everything
//! else, so this file exercises `map_uri` directly with the same
//! `apply_index` flag the connection handler passes in.

use std::path::PathBuf;

use zaver::pathmap::map_uri;

fn docroot(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "zaver-router-test-{name}-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn root_uri_maps_to_index_html() {
    let dir = docroot("root-index");
    let mapped = map_uri("/", &dir, true).unwrap();
    assert_eq!(mapped.disk_path, dir.join("index.html"));
}

#[test]
fn nested_static_file_resolves_under_docroot() {
    let dir = docroot("nested-static");
    std::fs::create_dir_all(dir.join("assets")).unwrap();
    std::fs::write(dir.join("assets/app.css"), b"body{}").unwrap();

    let mapped = map_uri("/assets/app.css", &dir, true).unwrap();
    assert_eq!(mapped.disk_path, dir.join("assets/app.css"));
}

#[test]
fn cgi_bin_prefix_is_left_unmapped_by_the_index_heuristic() {
    let dir = docroot("cgi-prefix");
    std::fs::create_dir_all(dir.join("cgi-bin")).unwrap();
    std::fs::write(dir.join("cgi-bin/hello"), b"#!/bin/sh\n").unwrap();

    // The static path always applies the index heuristic; the CGI
    // branch resolves the bare script path instead, modeled here by the
    // `apply_index = false` caller.
    let mapped = map_uri("/cgi-bin/hello", &dir, false).unwrap();
    assert_eq!(mapped.disk_path, dir.join("cgi-bin/hello"));
    assert_eq!(mapped.uri_path, "/cgi-bin/hello");
}

#[test]
fn cgi_query_string_is_carried_separately_from_the_path() {
    let dir = docroot("cgi-query");
    std::fs::create_dir_all(dir.join("cgi-bin")).unwrap();
    std::fs::write(dir.join("cgi-bin/echo"), b"#!/bin/sh\n").unwrap();

    let mapped = map_uri("/cgi-bin/echo?a=1&b=2", &dir, false).unwrap();
    assert_eq!(mapped.uri_path, "/cgi-bin/echo");
    assert_eq!(mapped.query_string, "a=1&b=2");
}

#[test]
fn traversal_above_docroot_is_rejected() {
    let dir = docroot("traversal");
    assert!(map_uri("/../../etc/passwd", &dir, true).is_err());
    assert!(map_uri("/%2e%2e/%2e%2e/etc/passwd", &dir, true).is_err());
}

#[test]
fn extensionless_final_segment_gets_index_html_appended() {
    let dir = docroot("extensionless");
    std::fs::create_dir_all(dir.join("docs")).unwrap();
    std::fs::write(dir.join("docs/index.html"), b"hi").unwrap();

    // A final path segment with no `.` always gets /index.html
    // appended, even when a same-named regular file exists.
    let mapped = map_uri("/docs", &dir, true).unwrap();
    assert_eq!(mapped.disk_path, dir.join("docs/index.html"));
}
