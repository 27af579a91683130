//! Integration tests for kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn kiln() -> Command {
        cargo_bin_cmd!("kiln")
    }

    #[test]
    fn help_displays() {
        kiln()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("compiled-language scripts"));
    }

    #[test]
    fn version_displays() {
        kiln()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        kiln()
            .args(["config", "show"])
            .env("KILN_CONFIG", dir.path().join("config.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("shell = \"/bin/sh\""));
    }

    #[test]
    fn config_set_then_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        kiln()
            .args(["config", "set", "build.show_logs", "true"])
            .env("KILN_CONFIG", &path)
            .assert()
            .success();
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("show_logs = true"));

        kiln()
            .args(["config", "path"])
            .env("KILN_CONFIG", &path)
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn invalid_tool_config_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[build\n").unwrap();
        kiln()
            .args(["config", "show"])
            .env("KILN_CONFIG", &path)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

mod script_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Shell "compiler": copies the materialized source to `out`
    const BLOCK: &str = "\
# script_src: main.sh
# replace_shebang_with: \"#!/bin/sh\"
# build_once_cmd: echo once >> LOG
# build_cmd: echo build >> LOG && cp main.sh out && chmod +x out
# target_bin: ./out
";

    const BODY: &str = "echo \"args: $*\"\nexit 3\n";

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn log(&self) -> PathBuf {
            self.dir.path().join("build.log")
        }

        fn script(&self, name: &str, block: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            let block = block.replace("LOG", self.log().to_str().unwrap());
            let text = format!(
                "#!/usr/bin/env kiln\n# kiln-begin\n{}# kiln-end\n{}",
                block, body
            );
            std::fs::write(&path, text).unwrap();
            path
        }

        fn kiln(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("kiln");
            cmd.env("KILN_CACHE_ROOT", self.dir.path().join("cache"))
                .env("KILN_CONFIG", self.dir.path().join("config.toml"))
                .env_remove("KILN_LOG");
            cmd
        }

        fn runs(&self) -> Vec<String> {
            std::fs::read_to_string(self.log())
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn cache_path(&self, script: &Path) -> PathBuf {
            let output = self
                .kiln()
                .args(["cache", "get", "cache_path"])
                .arg(script)
                .output()
                .unwrap();
            assert!(output.status.success());
            PathBuf::from(String::from_utf8(output.stdout).unwrap().trim())
        }
    }

    #[test]
    fn first_run_builds_and_passes_exit_code() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);

        fx.kiln()
            .arg(&script)
            .args(["a", "--flag", "b c"])
            .assert()
            .code(3)
            .stdout("args: a --flag b c\n");
        assert_eq!(fx.runs(), vec!["once", "build"]);
    }

    #[test]
    fn cache_hit_spawns_no_build() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);

        fx.kiln().arg(&script).assert().code(3);
        fx.kiln().arg(&script).assert().code(3);
        fx.kiln().arg(&script).assert().code(3);
        assert_eq!(fx.runs(), vec!["once", "build"]);
    }

    #[test]
    fn script_file_is_never_modified() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);
        let before = std::fs::read(&script).unwrap();

        fx.kiln().arg(&script).assert().code(3);
        assert_eq!(std::fs::read(&script).unwrap(), before);
    }

    #[test]
    fn deleted_artifact_rebuilds_without_setup() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);
        fx.kiln().arg(&script).assert().code(3);

        let entry = fx.cache_path(&script);
        std::fs::remove_file(entry.join("out")).unwrap();

        fx.kiln().arg(&script).assert().code(3);
        assert_eq!(fx.runs(), vec!["once", "build", "build"]);
    }

    #[test]
    fn edited_script_gets_new_entry() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);
        fx.kiln().arg(&script).assert().code(3);
        let first = fx.cache_path(&script);

        fx.script("tool", BLOCK, "echo changed\n");
        fx.kiln().arg(&script).assert().success().stdout("changed\n");
        let second = fx.cache_path(&script);

        assert_ne!(first, second);
        assert!(first.exists(), "old entries are kept");
        assert_eq!(fx.runs(), vec!["once", "build", "once", "build"]);
    }

    #[test]
    fn stdin_reaches_the_artifact() {
        let fx = Fixture::new();
        let script = fx.script("cat", BLOCK, "cat\n");

        fx.kiln()
            .arg(&script)
            .write_stdin("piped input\n")
            .assert()
            .success()
            .stdout("piped input\n");
    }

    #[test]
    fn build_failure_exits_70_with_output() {
        let fx = Fixture::new();
        let script = fx.script(
            "broken",
            "# build_cmd: echo 'main.c:3: error' >&2; exit 1\n",
            "int main() {}\n",
        );

        fx.kiln()
            .arg(&script)
            .assert()
            .code(70)
            .stdout("")
            .stderr(predicate::str::contains("main.c:3: error"))
            .stderr(predicate::str::contains("build_cmd failed"));
    }

    #[test]
    fn build_failure_code_is_fixed() {
        let fx = Fixture::new();
        let script = fx.script("broken", "# build_cmd: exit 42\n", "");
        fx.kiln().arg(&script).assert().code(70);
    }

    #[test]
    fn missing_build_cmd_exits_78() {
        let fx = Fixture::new();
        let script = fx.script("nobuild", "# script_src: main.c\n", "int main() {}\n");

        fx.kiln()
            .arg(&script)
            .assert()
            .code(78)
            .stderr(predicate::str::contains("build_cmd"));
    }

    #[test]
    fn missing_block_exits_78() {
        let fx = Fixture::new();
        let path = fx.dir.path().join("plain");
        std::fs::write(&path, "#!/usr/bin/env kiln\necho hi\n").unwrap();

        fx.kiln()
            .arg(&path)
            .assert()
            .code(78)
            .stderr(predicate::str::contains("kiln-begin"));
    }

    #[test]
    fn missing_artifact_exits_127() {
        let fx = Fixture::new();
        let script = fx.script("noartifact", "# build_cmd: true\n# target_bin: ./missing\n", "");
        fx.kiln().arg(&script).assert().code(127);
    }

    #[test]
    fn build_subcommand_does_not_run() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);

        fx.kiln()
            .arg("build")
            .arg(&script)
            .assert()
            .success()
            .stdout("")
            .stderr(predicate::str::contains("Built"));
        fx.kiln()
            .arg("build")
            .arg(&script)
            .assert()
            .success()
            .stderr(predicate::str::contains("Up to date"));
        assert_eq!(fx.runs(), vec!["once", "build"]);
    }

    #[test]
    fn build_full_mode_reruns_setup() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);
        fx.kiln().arg("build").arg(&script).assert().success();
        fx.kiln()
            .args(["build", "--mode", "full"])
            .arg(&script)
            .assert()
            .success();
        assert_eq!(fx.runs(), vec!["once", "build", "once", "build"]);
    }

    #[test]
    fn cache_info_json_reports_state() {
        let fx = Fixture::new();
        let script = fx.script("tool", BLOCK, BODY);

        fx.kiln()
            .args(["cache", "info", "--format", "json"])
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"state\": \"empty\""));

        fx.kiln().arg(&script).assert().code(3);
        fx.kiln()
            .args(["cache", "get", "state"])
            .arg(&script)
            .assert()
            .success()
            .stdout("built\n");
    }

    /// Stand-in `go`: logs each call; `build` needs a `package main` `.go` file
    const GO_SHIM: &str = r#"#!/bin/sh
echo "go $*" >> LOG
case "$1" in
  mod)
    test -f go.mod || { echo "go: go.mod file not found" >&2; exit 1; }
    ;;
  build)
    set -- *.go
    if [ ! -f "$1" ]; then echo "no Go files in $(pwd)" >&2; exit 1; fi
    grep -q '^package main' "$1" || { echo "$1: not package main" >&2; exit 1; }
    printf '#!/bin/sh\necho "hello $*"\n' > script
    chmod +x script
    ;;
esac
"#;

    const HELLO_GO: &str = "\
#!/usr/bin/env kiln
package main

// kiln-begin
// build_once_cmd: go mod tidy
// build_cmd: go build -o script
// files:
//  - path: go.mod
//    content: |
//      module x
// kiln-end

import \"fmt\"

func main() { fmt.Println(\"hello\") }
";

    #[test]
    fn go_script_builds_once_with_default_layout() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        let bin = fx.dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let go = bin.join("go");
        std::fs::write(&go, GO_SHIM.replace("LOG", fx.log().to_str().unwrap())).unwrap();
        std::fs::set_permissions(&go, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path = format!("{}:{}", bin.display(), std::env::var("PATH").unwrap_or_default());

        let script = fx.dir.path().join("hello.go");
        std::fs::write(&script, HELLO_GO).unwrap();

        for _ in 0..2 {
            fx.kiln()
                .env("PATH", &path)
                .arg(&script)
                .arg("world")
                .assert()
                .success()
                .stdout("hello world\n");
        }
        assert_eq!(fx.runs(), vec!["go mod tidy", "go build -o script"]);

        let entry = fx.cache_path(&script);
        let source = std::fs::read_to_string(entry.join("hello.go")).unwrap();
        assert!(source.starts_with("\npackage main\n"));
        assert_eq!(std::fs::read_to_string(entry.join("go.mod")).unwrap(), "module x\n");
    }

    #[test]
    fn sigterm_during_build_leaves_entry_resumable() {
        let fx = Fixture::new();
        let block = BLOCK.replace("echo build >> LOG", "echo build >> LOG && sleep 2");
        let script = fx.script("slow", &block, BODY);

        let mut first = std::process::Command::new(env!("CARGO_BIN_EXE_kiln"))
            .arg(&script)
            .env("KILN_CACHE_ROOT", fx.dir.path().join("cache"))
            .env("KILN_CONFIG", fx.dir.path().join("config.toml"))
            .env_remove("KILN_LOG")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !fx.runs().contains(&"build".to_string()) {
            assert!(std::time::Instant::now() < deadline, "build step never started");
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let killed = std::process::Command::new("kill")
            .args(["-TERM", &first.id().to_string()])
            .status()
            .unwrap();
        assert!(killed.success());

        let status = first.wait().unwrap();
        assert_eq!(status.code(), Some(143));

        let entry = fx.cache_path(&script);
        assert!(!entry.join(".kiln-built").exists());
        assert!(entry.join(".kiln-once").exists());

        fx.kiln().arg(&script).assert().code(3);
        assert_eq!(fx.runs(), vec!["once", "build", "build"]);
    }

    #[test]
    fn concurrent_first_runs_build_once() {
        let fx = Fixture::new();
        let block = BLOCK.replace("echo build >> LOG", "echo build >> LOG && sleep 1");
        let script = fx.script("slow", &block, BODY);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_kiln"));
                cmd.arg(&script)
                    .env("KILN_CACHE_ROOT", fx.dir.path().join("cache"))
                    .env("KILN_CONFIG", fx.dir.path().join("config.toml"))
                    .env_remove("KILN_LOG");
                std::thread::spawn(move || cmd.output().unwrap())
            })
            .collect();

        for handle in handles {
            let output = handle.join().unwrap();
            assert_eq!(output.status.code(), Some(3));
            assert_eq!(output.stdout, b"args: \n");
        }
        assert_eq!(fx.runs(), vec!["once", "build"]);
    }
}
