#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use vigil_cli::Cli;

    mod arguments {
        use super::*;

        #[test]
        fn test_command_definition_is_consistent() {
            Cli::command().debug_assert();
        }

        #[test]
        fn test_parse_classify() {
            let parsed = Cli::try_parse_from([
                "vigil", "classify", "shell.exec", "--target", "/workspace", "--hint", "rm -rf /",
                "--hint", "second", "--json",
            ]);
            assert!(parsed.is_ok());
        }

        #[test]
        fn test_parse_trust_subcommands() {
            for args in [
                vec!["vigil", "trust", "list", "--json"],
                vec!["vigil", "trust", "approve", "fs.write"],
                vec!["vigil", "trust", "reject", "fs.write"],
                vec!["vigil", "trust", "revoke", "fs.write", "--reason", "incident"],
            ] {
                assert!(Cli::try_parse_from(&args).is_ok(), "failed to parse {args:?}");
            }
        }

        #[test]
        fn test_parse_receipts_flags() {
            assert!(Cli::try_parse_from(["vigil", "receipts", "-n", "5", "--batches"]).is_ok());
            assert!(Cli::try_parse_from(["vigil", "receipts", "--verify"]).is_ok());
            assert!(Cli::try_parse_from(["vigil", "receipts", "--action", "not-a-uuid"]).is_err());
        }

        #[test]
        fn test_verbose_and_quiet_conflict() {
            assert!(Cli::try_parse_from(["vigil", "-v", "-q", "config"]).is_err());
        }

        #[test]
        fn test_subcommand_required() {
            assert!(Cli::try_parse_from(["vigil"]).is_err());
        }
    }

    mod backend {
        use vigil_cli::commands::DetachedBackend;
        use vigil_core::{ActionIntent, ExecutionBackend, VigilError};

        #[tokio::test]
        async fn test_detached_backend_refuses_execution() {
            let intent = ActionIntent::new("fs.write", "cli").with_target("/workspace/a.txt");
            let err = DetachedBackend.execute(&intent).await.unwrap_err();
            assert!(matches!(
                err,
                VigilError::Execution { capability, .. } if capability == "fs.write"
            ));
        }
    }
}
