//! Config parsing, filters file merging, validation and path resolution.

use std::fs;
use std::path::Path;

use channel_relay::config::{config_dir, load_config, resolve_config_path_with, Config};

const BASE: &str = r#"
[telegram]
bot_token_env = "RELAY_BOT_TOKEN"
channels = ["@technews", "-1001234567890"]

[whatsapp]
token_env = "RELAY_WA_TOKEN"
phone_number_id = "1098765"
recipient = "15551234567"
"#;

fn parse(extra: &str) -> Config {
    match Config::from_toml(&format!("{BASE}{extra}")) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err:#}"),
    }
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Err(err) = fs::write(&path, contents) {
        panic!("should write {}: {err}", path.display());
    }
    path
}

#[test]
fn full_config_parses() {
    let config = parse(
        r#"
[llm]
model = "gpt-4o-mini"
base_url = "http://localhost:1234/v1"

[forwarding]
album_debounce_ms = 800
max_text_len = 2000
max_caption_len = 500
link_base_url = "https://t.me/"
extra_supported_mimes = ["image/gif"]
shutdown_timeout_secs = 5

[[filters]]
name = "ads"
prompt = "Skip advertisements."

[[filters]]
name = "politics"
prompt = "Skip political content."
"#,
    );

    assert_eq!(config.telegram.bot_token_env, "RELAY_BOT_TOKEN");
    assert_eq!(config.telegram.channels.len(), 2);
    let llm = config.llm.as_ref().map(|l| (l.api_key_env.as_str(), l.model.as_str()));
    assert_eq!(llm, Some(("LLM_API_KEY", "gpt-4o-mini")));
    assert_eq!(config.forwarding.album_debounce().as_millis(), 800);
    assert_eq!(config.forwarding.limits().max_text_len, 2000);
    assert_eq!(config.forwarding.limits().max_caption_len, 500);
    assert_eq!(config.forwarding.shutdown_timeout().as_secs(), 5);
    assert!(config.forwarding.supported_mimes().contains("image/gif"));
    let names: Vec<&str> = config.filters.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["ads", "politics"]);
    assert!(config.filtering_enabled());
    assert!(config.validate().is_ok());
}

#[test]
fn filters_without_llm_are_valid_but_inactive() {
    let config = parse("\n[[filters]]\nname = \"ads\"\nprompt = \"Skip ads.\"\n");
    assert!(config.validate().is_ok());
    assert!(!config.filtering_enabled());
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        "\n[forwarding]\nmax_text_len = 0\n",
        "\n[[filters]]\nname = \"ads\"\nprompt = \"  \"\n",
        "\n[[filters]]\nname = \"\"\nprompt = \"p\"\n",
        "\n[[filters]]\nname = \"ads\"\nprompt = \"a\"\n[[filters]]\nname = \"ads\"\nprompt = \"b\"\n",
        "\n[forwarding]\nlink_base_url = \"not a url\"\n",
        "\n[llm]\nmodel = \"m\"\nbase_url = \"ftp://example.com\"\n",
    ];
    for extra in cases {
        assert!(parse(extra).validate().is_err(), "should reject: {extra}");
    }
}

#[test]
fn empty_channel_list_is_rejected() {
    let toml_str = BASE.replace(r#"["@technews", "-1001234567890"]"#, "[]");
    let config = match Config::from_toml(&toml_str) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err:#}"),
    };
    assert!(config.validate().is_err());
}

#[test]
fn missing_whatsapp_section_fails_to_parse() {
    assert!(Config::from_toml("[telegram]\nchannels = [\"@a\"]\n").is_err());
}

#[test]
fn load_config_appends_filters_file() {
    let tmp = match tempfile::tempdir() {
        Ok(tmp) => tmp,
        Err(err) => panic!("should create temp dir: {err}"),
    };
    write(
        tmp.path(),
        "filters.toml",
        "[[filters]]\nname = \"crypto\"\nprompt = \"\"\"\n  Skip crypto shilling.\n\"\"\"\n",
    );
    let config_path = write(
        tmp.path(),
        "config.toml",
        &format!(
            "filters_file = \"filters.toml\"\n{BASE}\n[[filters]]\nname = \"ads\"\nprompt = \"Skip ads.\"\n"
        ),
    );

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => panic!("config should load: {err:#}"),
    };
    let rules: Vec<(&str, &str)> = config
        .filters
        .iter()
        .map(|r| (r.name.as_str(), r.prompt.as_str()))
        .collect();
    assert_eq!(
        rules,
        vec![("ads", "Skip ads."), ("crypto", "Skip crypto shilling.")]
    );
}

#[test]
fn load_config_reports_missing_filters_file() {
    let tmp = match tempfile::tempdir() {
        Ok(tmp) => tmp,
        Err(err) => panic!("should create temp dir: {err}"),
    };
    let config_path = write(
        tmp.path(),
        "config.toml",
        &format!("filters_file = \"absent.toml\"\n{BASE}"),
    );
    let err = match load_config(&config_path) {
        Ok(_) => panic!("missing filters file should fail"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn load_config_reports_path_on_missing_file() {
    let err = match load_config(Path::new("/nonexistent/relay.toml")) {
        Ok(_) => panic!("missing config should fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("/nonexistent/relay.toml"));
}

#[test]
fn default_path_lives_in_config_dir() {
    let path = match resolve_config_path_with(None, |_| None) {
        Ok(path) => path,
        Err(err) => panic!("path should resolve: {err}"),
    };
    let dir = match config_dir() {
        Ok(dir) => dir,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(dir.ends_with(".channel-relay"));
    assert_eq!(path, dir.join("config.toml"));
}
