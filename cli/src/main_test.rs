mod tests {
    use crate::*;

    #[test]
    fn test_trace_setting_switches() {
        assert_eq!(TraceSetting::parse(""), TraceSetting::Off);
        assert_eq!(TraceSetting::parse("off"), TraceSetting::Off);
        assert_eq!(TraceSetting::parse("FALSE"), TraceSetting::Off);
        assert_eq!(TraceSetting::parse(" 1 "), TraceSetting::DefaultFilter);
        assert_eq!(TraceSetting::parse("true"), TraceSetting::DefaultFilter);
    }

    #[test]
    fn test_trace_setting_keeps_filter_expressions() {
        assert_eq!(
            TraceSetting::parse("umbra::frame=debug"),
            TraceSetting::Filter("umbra::frame=debug".to_string())
        );
    }

    #[test]
    fn test_cli_args_stack_defaults() {
        let args = CliArgs::try_parse_from(["umbra", "stack"]).expect("should parse");
        match args.command {
            Commands::Stack { detail, json } => {
                assert_eq!(detail, DetailArg::Names);
                assert!(!json);
            }
            other => panic!("expected stack command, got {:?}", other),
        }
        assert!(args.config.is_none());
    }

    #[test]
    fn test_cli_args_global_config_after_subcommand() {
        let args = CliArgs::try_parse_from(["umbra", "generator", "--kind", "coroutine", "--config", "umbra.toml"])
            .expect("should parse");
        assert_eq!(args.config.as_deref(), Some(Path::new("umbra.toml")));
        match args.command {
            Commands::Generator { kind, yields, interpreted } => {
                assert_eq!(GeneratorKind::from(kind), GeneratorKind::Coroutine);
                assert_eq!(yields, 3);
                assert!(!interpreted);
            }
            other => panic!("expected generator command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_args_rejects_unknown_detail() {
        assert!(CliArgs::try_parse_from(["umbra", "stack", "--detail", "everything"]).is_err());
    }

    #[test]
    fn test_detail_maps_to_snapshot_detail() {
        assert_eq!(SnapshotDetail::from(DetailArg::Names), SnapshotDetail::Names);
        assert_eq!(SnapshotDetail::from(DetailArg::Lines), SnapshotDetail::NamesAndLines);
        assert_eq!(SnapshotDetail::from(DetailArg::Frames), SnapshotDetail::NamesLinesAndFrames);
    }

    #[test]
    fn test_demo_stack_follows_the_awaiter() {
        let snapshot = capture_demo_stack(SnapshotDetail::NamesLinesAndFrames).expect("demo stack");
        let names: Vec<&str> = snapshot.names().collect();
        assert_eq!(names, ["demo:handler", "demo:fetch"]);
        let entries = snapshot.entries();
        assert_eq!(entries[0].line, Some(11));
        assert_eq!(entries[1].line, Some(22));
        assert!(entries[0].frame.is_some());
        assert!(entries[1].frame.is_none());
        assert_eq!(ShadowStack::depth(), 0);
    }

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        let config = load_config(None).expect("defaults");
        assert_eq!(config.walk.max_depth, umbra_core::walk::DEFAULT_MAX_DEPTH);
    }
}
