use super::*;

#[test]
fn parses_run_command() {
    let cli = Cli::try_parse_from([
        "skuscout", "run", "--site", "acme-supply", "--input", "skus.json",
    ])
    .expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Commands::Run {
            ref site,
            output: None,
            debug_step: false,
            headed: false,
            ..
        } if site == "acme-supply"
    ));
}

#[test]
fn parses_run_with_output_and_flags() {
    let cli = Cli::try_parse_from([
        "skuscout",
        "run",
        "--site",
        "corner-pantry",
        "--input",
        "-",
        "--output",
        "out.json",
        "--debug-step",
        "--headed",
    ])
    .expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Commands::Run {
            output: Some(ref out),
            debug_step: true,
            headed: true,
            ..
        } if out == &PathBuf::from("out.json")
    ));
}

#[test]
fn run_requires_site() {
    assert!(Cli::try_parse_from(["skuscout", "run", "--input", "skus.json"]).is_err());
}

#[test]
fn registry_flag_is_global() {
    let cli = Cli::try_parse_from(["skuscout", "sites", "--registry", "other.yaml"])
        .expect("expected valid cli args");
    assert!(matches!(cli.command, Commands::Sites));
    assert_eq!(cli.registry, Some(PathBuf::from("other.yaml")));
}

#[test]
fn missing_subcommand_is_an_error() {
    assert!(Cli::try_parse_from(["skuscout"]).is_err());
}

#[test]
fn input_object_with_batch_size() {
    let input = run::parse_input(r#"{"skus": ["A-1", "B-2"], "batch_size": 10}"#).unwrap();
    assert_eq!(input.skus, vec!["A-1", "B-2"]);
    assert_eq!(input.batch_size, Some(10));
}

#[test]
fn input_bare_array() {
    let input = run::parse_input(r#"["A-1"]"#).unwrap();
    assert_eq!(input.skus, vec!["A-1"]);
    assert_eq!(input.batch_size, None);
}

#[test]
fn input_rejects_zero_batch_size() {
    assert!(run::parse_input(r#"{"skus": [], "batch_size": 0}"#).is_err());
}

#[test]
fn input_rejects_non_string_skus() {
    assert!(run::parse_input("[1, 2]").is_err());
}
