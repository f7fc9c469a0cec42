use serde_json::json;

use super::*;

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn fields_keep_json_types_and_fall_back_to_strings() {
    let fields = parse_fields(&args(&["name=Ada Lovelace", "seats=3", "newsletter=true", "tags=[\"a\"]", "note="]))
        .unwrap();

    assert_eq!(fields.get("name"), Some(&json!("Ada Lovelace")));
    assert_eq!(fields.get("seats"), Some(&json!(3)));
    assert_eq!(fields.get("newsletter"), Some(&json!(true)));
    assert_eq!(fields.get("tags"), Some(&json!(["a"])));
    assert_eq!(fields.get("note"), Some(&json!("")));
}

#[test]
fn field_value_may_contain_equals_sign() {
    let fields = parse_fields(&args(&["query=a=b"])).unwrap();
    assert_eq!(fields.get("query"), Some(&json!("a=b")));
}

#[test]
fn malformed_fields_are_rejected() {
    assert!(matches!(parse_fields(&args(&["novalue"])), Err(CliError::InvalidField(f)) if f == "novalue"));
    assert!(matches!(parse_fields(&args(&["=x"])), Err(CliError::InvalidField(_))));
}

#[test]
fn cli_parses_submit_with_defaults() {
    let cli = Cli::try_parse_from(["p360", "submit", "--endpoint", "/api/chats", "--field", "q=hi"]).unwrap();
    assert_eq!(cli.base_url, "http://127.0.0.1:3000");
    let Command::Submit { endpoint, route, fields, encoding, method } = cli.command else {
        panic!("expected submit");
    };
    assert_eq!(endpoint.as_deref(), Some("/api/chats"));
    assert_eq!(route, None);
    assert_eq!(fields, vec!["q=hi".to_owned()]);
    assert!(matches!(encoding, BodyEncoding::Json));
    assert_eq!(method, "POST");
}

#[test]
fn encoding_flag_maps_to_form_encoding() {
    assert_eq!(Encoding::from(BodyEncoding::Urlencoded), Encoding::UrlEncoded);
    assert_eq!(Encoding::from(BodyEncoding::Multipart), Encoding::Multipart);
}

#[test]
fn submit_takes_a_route_instead_of_an_endpoint() {
    let cli = Cli::try_parse_from(["p360", "submit", "--route", "/api/uploads", "--encoding", "multipart"]).unwrap();
    let Command::Submit { endpoint, route, encoding, .. } = cli.command else {
        panic!("expected submit");
    };
    assert_eq!(endpoint, None);
    assert_eq!(route.as_deref(), Some("/api/uploads"));
    assert!(matches!(encoding, BodyEncoding::Multipart));
}

#[test]
fn submit_needs_exactly_one_target() {
    assert!(Cli::try_parse_from(["p360", "submit"]).is_err());
    assert!(Cli::try_parse_from(["p360", "submit", "--endpoint", "/a", "--route", "/b"]).is_err());
}
