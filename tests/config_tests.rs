use mcp_supervisor::config::{
    Config, ConfigSource, EligibilityRules, ServerConfig, partition, validate_config,
};
use mcp_supervisor::error::Result;
use std::collections::{HashMap, HashSet};

fn server(command: &str, args: &[&str]) -> ServerConfig {
    ServerConfig {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: HashMap::new(),
    }
}

#[test]
fn test_parse_config() -> Result<()> {
    let config_str = r#"{
        "mcpServers": {
            "echo-server": {
                "command": "node",
                "args": ["/opt/echo/index.js"]
            },
            "github": {
                "command": "npx",
                "args": ["-y", "@modelcontextprotocol/server-github"],
                "env": {
                    "GITHUB_TOKEN": "your_token_here"
                }
            }
        }
    }"#;

    let config = Config::parse_from_str(config_str)?;

    assert_eq!(config.mcp_servers.len(), 2);
    let echo = &config.mcp_servers["echo-server"];
    assert_eq!(echo.command, "node");
    assert_eq!(echo.args, vec!["/opt/echo/index.js"]);
    assert!(echo.env.is_empty());

    let gh = &config.mcp_servers["github"];
    assert_eq!(
        gh.env.get("GITHUB_TOKEN"),
        Some(&"your_token_here".to_string())
    );

    Ok(())
}

#[test]
fn test_validate_config() -> Result<()> {
    let mut config_map = HashMap::new();
    config_map.insert("echo".to_string(), server("node", &["echo.js"]));
    validate_config(&config_map)?;

    // Nothing configured is fine
    validate_config(&HashMap::new())?;

    let mut invalid = HashMap::new();
    invalid.insert("invalid".to_string(), server("", &[]));
    assert!(validate_config(&invalid).is_err());

    let mut bad_name = HashMap::new();
    bad_name.insert("../escape".to_string(), server("node", &[]));
    assert!(validate_config(&bad_name).is_err());

    Ok(())
}

#[test]
fn test_source_treats_errors_as_empty() {
    let dir = tempfile::tempdir().unwrap();

    let missing = ConfigSource::new(dir.path().join("missing.json"));
    assert!(missing.try_load().is_err());
    assert!(missing.load().mcp_servers.is_empty());

    let malformed_path = dir.path().join("bad.json");
    std::fs::write(&malformed_path, "{ \"mcpServers\": [").unwrap();
    assert!(ConfigSource::new(&malformed_path).load().mcp_servers.is_empty());

    let invalid_path = dir.path().join("invalid.json");
    std::fs::write(
        &invalid_path,
        r#"{"mcpServers": {"a": {"command": "", "args": []}}}"#,
    )
    .unwrap();
    assert!(ConfigSource::new(&invalid_path).load().mcp_servers.is_empty());
}

#[test]
fn test_source_reads_fresh_each_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let source = ConfigSource::new(&path);

    std::fs::write(&path, "mcpServers:\n  one:\n    command: node\n").unwrap();
    assert_eq!(source.load().mcp_servers.len(), 1);

    std::fs::write(
        &path,
        "mcpServers:\n  one:\n    command: node\n  two:\n    command: python\n",
    )
    .unwrap();
    assert_eq!(source.load().mcp_servers.len(), 2);
}

#[test]
fn test_partition_is_total_and_disjoint() {
    let mut servers = HashMap::new();
    servers.insert("echo-server".to_string(), server("node", &["echo.js"]));
    servers.insert("fetch".to_string(), server("uvx", &["mcp-server-fetch"]));
    servers.insert("github".to_string(), server("/usr/local/bin/npx", &["-y", "x"]));
    servers.insert("browser".to_string(), server("python", &["-m", "browser"]));
    servers.insert("db".to_string(), server("./db-server", &[]));

    let rules = EligibilityRules {
        on_demand_servers: vec!["browser".to_string()],
        ..EligibilityRules::default()
    };
    let split = partition(&servers, &rules);

    let supervised: HashSet<&String> = split.supervised.keys().collect();
    let excluded: HashSet<&String> = split.excluded.keys().collect();
    let all: HashSet<&String> = servers.keys().collect();

    assert!(supervised.is_disjoint(&excluded));
    assert_eq!(
        supervised.union(&excluded).cloned().collect::<HashSet<_>>(),
        all
    );

    assert!(split.supervised.contains_key("echo-server"));
    assert!(split.supervised.contains_key("db"));
    assert!(split.excluded.contains_key("fetch"));
    assert!(split.excluded.contains_key("github"));
    assert!(split.excluded.contains_key("browser"));
}
