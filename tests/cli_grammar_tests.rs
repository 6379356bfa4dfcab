//! CLI grammar construction and parse behavior, end to end.

use std::rc::Rc;

use serde_json::json;
use settings_stack::sources::env::EnvSource;
use settings_stack::{
    CliOptions, Field, FieldKind, FlagMode, ResolutionConfig, Schema, SettingsBuilder,
    SettingsError,
};

fn cli(args: &[&str]) -> CliOptions {
    CliOptions::new()
        .exit_on_error(false)
        .with_args(args.iter().copied())
}

/// A builder whose only value-bearing source is a fixed env snapshot.
fn env_only(schema: Schema, entries: &[(&str, &str)]) -> SettingsBuilder {
    let env = Rc::new(EnvSource::with_snapshot(
        ResolutionConfig::default(),
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    ));
    SettingsBuilder::new(schema).customize_sources(move |mut sources| {
        let at = sources.len() - 1;
        sources.insert(at, env.clone());
        sources
    })
}

fn flag_schema() -> Schema {
    Schema::builder("Service")
        .field(Field::new("flag", FieldKind::Bool).with_default(true))
        .build()
}

#[test]
fn implicit_dual_flags_parse_both_spellings() {
    let on = SettingsBuilder::new(flag_schema())
        .with_cli(cli(&["--flag"]).implicit_flags(true))
        .load()
        .expect("load --flag");
    assert_eq!(on, json!({"flag": true}));

    let off = SettingsBuilder::new(flag_schema())
        .with_cli(cli(&["--no-flag"]).implicit_flags(true))
        .load()
        .expect("load --no-flag");
    assert_eq!(off, json!({"flag": false}));
}

#[test]
fn absent_dual_flag_falls_back_to_the_default() {
    let merged = SettingsBuilder::new(flag_schema())
        .with_cli(cli(&[]).implicit_flags(true))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"flag": true}));
}

#[test]
fn toggle_flags_invert_their_default() {
    let schema = Schema::builder("Service")
        .field(
            Field::new("verbose", FieldKind::Bool)
                .with_flag_mode(FlagMode::Toggle)
                .with_default(false),
        )
        .build();
    let toggled = SettingsBuilder::new(schema.clone())
        .with_cli(cli(&["--verbose"]))
        .load()
        .expect("load --verbose");
    assert_eq!(toggled, json!({"verbose": true}));

    let untouched = SettingsBuilder::new(schema)
        .with_cli(cli(&[]))
        .load()
        .expect("load");
    assert_eq!(untouched, json!({"verbose": false}));
}

fn items_schema() -> Schema {
    Schema::builder("Service")
        .field(Field::new("items", FieldKind::list_of(FieldKind::Int)))
        .build()
}

#[test]
fn repeated_list_flags_match_a_json_literal_env_value() {
    let from_cli = SettingsBuilder::new(items_schema())
        .with_cli(cli(&["--items", "1", "--items", "2", "--items", "3"]))
        .load()
        .expect("cli load");
    let from_env = env_only(items_schema(), &[("ITEMS", "[1,2,3]")])
        .load()
        .expect("env load");
    assert_eq!(from_cli, from_env);
    assert_eq!(from_cli, json!({"items": [1, 2, 3]}));
}

#[test]
fn positional_arguments_fill_their_field() {
    let schema = Schema::builder("Service")
        .field(Field::new("path", FieldKind::Str).positional())
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["/var/data"]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"path": "/var/data"}));
}

#[test]
fn variadic_positionals_collect_into_a_list() {
    let schema = Schema::builder("Service")
        .field(Field::new("files", FieldKind::list_of(FieldKind::Str)).positional())
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["a.txt", "b.txt"]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"files": ["a.txt", "b.txt"]}));
}

fn db_schema() -> Schema {
    Schema::builder("Service")
        .field(Field::new(
            "db",
            FieldKind::model(
                Schema::builder("Db")
                    .field(Field::new("host", FieldKind::Str))
                    .field(Field::new("port", FieldKind::Int))
                    .build(),
            ),
        ))
        .build()
}

#[test]
fn nested_model_fields_parse_dotted_flags() {
    let merged = SettingsBuilder::new(db_schema())
        .with_cli(cli(&["--db.host", "db.internal", "--db.port", "5432"]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"db": {"host": "db.internal", "port": 5432}}));
}

#[test]
fn json_blob_flag_seeds_a_nested_model() {
    let merged = SettingsBuilder::new(db_schema())
        .with_cli(cli(&["--db", r#"{"host": "db.internal", "port": 5432}"#]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"db": {"host": "db.internal", "port": 5432}}));
}

#[test]
fn dotted_flags_override_blob_values() {
    let merged = SettingsBuilder::new(db_schema())
        .with_cli(cli(&[
            "--db",
            r#"{"host": "from-blob", "port": 1}"#,
            "--db.host",
            "from-flag",
        ]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"db": {"host": "from-flag", "port": 1}}));
}

#[test]
fn avoid_json_drops_the_blob_flag() {
    let parsed = SettingsBuilder::new(db_schema())
        .with_cli(cli(&["--db.host", "db.internal"]).avoid_json(true))
        .load()
        .expect("dotted flags still parse");
    assert_eq!(parsed, json!({"db": {"host": "db.internal"}}));

    let error = SettingsBuilder::new(db_schema())
        .with_cli(cli(&["--db", "{}"]).avoid_json(true))
        .load()
        .expect_err("blob flag must be gone");
    assert!(matches!(error, SettingsError::CliParse(_)));
}

fn command_schema() -> Schema {
    let clone = Schema::builder("CloneCmd")
        .field(Field::new("repository", FieldKind::Str))
        .build();
    let fetch = Schema::builder("FetchCmd")
        .field(Field::new("remote", FieldKind::Str))
        .build();
    Schema::builder("Service")
        .field(
            Field::new(
                "command",
                FieldKind::Union(vec![FieldKind::Model(clone), FieldKind::Model(fetch)]),
            )
            .subcommand(),
        )
        .build()
}

#[test]
fn subcommand_arguments_nest_under_their_field() {
    let merged = SettingsBuilder::new(command_schema())
        .with_cli(cli(&[
            "clone_cmd",
            "--command.repository",
            "https://example.com/repo.git",
        ]))
        .load()
        .expect("load");
    assert_eq!(
        merged,
        json!({"command": {"repository": "https://example.com/repo.git"}})
    );
}

#[test]
fn unentered_subcommands_resolve_to_null() {
    let merged = SettingsBuilder::new(command_schema())
        .with_cli(cli(&[]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"command": null}));
}

#[test]
fn entered_subcommand_without_flags_is_an_empty_object() {
    let merged = SettingsBuilder::new(command_schema())
        .with_cli(cli(&["fetch_cmd"]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"command": {}}));
}

#[test]
fn single_member_subcommands_use_the_field_name() {
    let deploy = Schema::builder("DeployCmd")
        .field(Field::new("target", FieldKind::Str))
        .build();
    let schema = Schema::builder("Service")
        .field(Field::new("deploy", FieldKind::model(deploy)).subcommand())
        .build();

    let merged = SettingsBuilder::new(schema.clone())
        .with_cli(cli(&["deploy", "--deploy.target", "prod"]))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"deploy": {"target": "prod"}}));

    let error = SettingsBuilder::new(schema)
        .with_cli(cli(&["deploy_cmd"]))
        .load()
        .expect_err("model name is not the command");
    assert!(matches!(error, SettingsError::CliParse(_)));
}

#[test]
fn kebab_case_flags_keep_snake_case_keys() {
    let schema = Schema::builder("Service")
        .field(Field::new("log_level", FieldKind::Str))
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["--log-level", "info"]).kebab_case(true))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"log_level": "info"}));
}

#[test]
fn case_insensitive_tokens_fold_to_the_declared_flag() {
    let schema = Schema::builder("Service")
        .field(Field::new("timeout", FieldKind::Int))
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["--TIMEOUT", "5"]).case_insensitive(true))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"timeout": 5}));
}

#[test]
fn prefixed_flags_strip_the_prefix_from_keys() {
    let schema = Schema::builder("Service")
        .field(Field::new("port", FieldKind::Int))
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["--app.port", "8080"]).with_prefix("app"))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"port": 8080}));
}

#[test]
fn invalid_prefix_fails_at_load() {
    let schema = Schema::builder("Service")
        .field(Field::new("port", FieldKind::Int))
        .build();
    let error = SettingsBuilder::new(schema)
        .with_cli(cli(&[]).with_prefix("9bad"))
        .load()
        .expect_err("prefix must be rejected");
    assert!(matches!(error, SettingsError::Configuration(_)));
    assert!(error
        .to_string()
        .contains("CLI settings source prefix is invalid: 9bad"));
}

#[test]
fn unknown_arguments_are_a_parse_error() {
    let schema = Schema::builder("Service")
        .field(Field::new("port", FieldKind::Int))
        .build();
    let error = SettingsBuilder::new(schema)
        .with_cli(cli(&["--bogus", "1"]))
        .load()
        .expect_err("unknown flag must fail");
    assert!(matches!(error, SettingsError::CliParse(_)));
}

#[test]
fn unknown_arguments_are_skipped_when_ignored() {
    let schema = Schema::builder("Service")
        .field(Field::new("port", FieldKind::Int))
        .build();
    let merged = SettingsBuilder::new(schema)
        .with_cli(cli(&["--port", "1", "--bogus", "x"]).ignore_unknown_args(true))
        .load()
        .expect("load");
    assert_eq!(merged, json!({"port": 1}));
}

#[test]
fn missing_required_arguments_error_when_enforced() {
    let schema = Schema::builder("Service")
        .field(Field::new("api_key", FieldKind::Str))
        .build();
    let error = SettingsBuilder::new(schema)
        .with_cli(cli(&[]).enforce_required(true))
        .load()
        .expect_err("required flag must be demanded");
    let SettingsError::CliParse(message) = error else {
        panic!("expected CLI parse error, got {error}");
    };
    assert!(message.contains("api_key"));
}

#[test]
fn exclusive_groups_reject_two_members() {
    let auth = Schema::builder("Auth")
        .field(Field::new("token", FieldKind::Str))
        .field(Field::new("password", FieldKind::Str))
        .build();
    let schema = Schema::builder("Service")
        .field(Field::new("auth", FieldKind::model(auth)).exclusive_group())
        .build();

    let single = SettingsBuilder::new(schema.clone())
        .with_cli(cli(&["--auth.token", "t-1"]))
        .load()
        .expect("single member parses");
    assert_eq!(single, json!({"auth": {"token": "t-1"}}));

    let error = SettingsBuilder::new(schema)
        .with_cli(cli(&["--auth.token", "t-1", "--auth.password", "p-1"]))
        .load()
        .expect_err("two members must conflict");
    let SettingsError::CliParse(message) = error else {
        panic!("expected CLI parse error, got {error}");
    };
    assert!(message.contains("cannot be used with"));
}
