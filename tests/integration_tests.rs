//! Integration Tests

#[macro_use]
extern crate lazy_static;

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use workdir::WorkDir;


struct ScriptData<'a> {
    pub script: &'a str,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub exit_status: i32,
}

lazy_static! {
    static ref JCSH_SCRIPTS_MAP: HashMap<&'static str, ScriptData<'static>> = {
        let mut map = HashMap::new();
        map.insert("simple_pipeline.jcsh", ScriptData {
            script: "echo hello | grep h\n",
            stdout: "hello\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_line_count.jcsh", ScriptData {
            script: "seq 1 5 | sort -rn | head -n 3 | wc -l\n",
            stdout: "3\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_redirects.jcsh", ScriptData {
            script: "echo hello > in.txt\ncat < in.txt > out.txt\ncat out.txt\n",
            stdout: "hello\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_append.jcsh", ScriptData {
            script: "echo one > log.txt\necho two >> log.txt\necho three>>log.txt\ncat log.txt\n",
            stdout: "one\ntwo\nthree\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_truncate.jcsh", ScriptData {
            script: "echo one > log.txt\necho two > log.txt\ncat log.txt\n",
            stdout: "two\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_builtin_redirect.jcsh", ScriptData {
            script: "jobs > jobs.txt\ncat jobs.txt\n",
            stdout: "",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_cd.jcsh", ScriptData {
            script: "cd /\npwd\n",
            stdout: "/\n",
            stderr: "",
            exit_status: 0,
        });
        map.insert("simple_exit_error.jcsh", ScriptData {
            script: "exit 85\necho unreachable\n",
            stdout: "",
            stderr: "",
            exit_status: 85,
        });
        map.insert("simple_exit_large.jcsh", ScriptData {
            script: "exit 500\n",
            stdout: "",
            stderr: "",
            exit_status: 244,
        });
        map.insert("simple_exit_negative.jcsh", ScriptData {
            script: "exit -244\n",
            stdout: "",
            stderr: "",
            exit_status: 12,
        });
        map.insert("simple_last_status.jcsh", ScriptData {
            script: "false\nexit\n",
            stdout: "",
            stderr: "",
            exit_status: 1,
        });
        map.insert("simple_command_not_found.jcsh", ScriptData {
            script: "jcsh-no-such-command\n",
            stdout: "",
            stderr: "jcsh: jcsh-no-such-command: No such file or directory\n",
            exit_status: 127,
        });
        map.insert("simple_syntax_error.jcsh", ScriptData {
            script: "echo a | | wc\n",
            stdout: "",
            stderr: "jcsh: syntax error: empty command in pipeline\n",
            exit_status: 2,
        });
        map.insert("simple_missing_input.jcsh", ScriptData {
            script: "cat < missing.txt\n",
            stdout: "",
            stderr: "jcsh: missing.txt: No such file or directory (os error 2)\n",
            exit_status: 1,
        });
        map.insert("simple_fg_not_found.jcsh", ScriptData {
            script: "fg 7\n",
            stdout: "",
            stderr: "fg: job 7 not found\n",
            exit_status: 1,
        });
        map.insert("simple_fg_usage.jcsh", ScriptData {
            script: "fg\n",
            stdout: "",
            stderr: "fg: usage: fg <job-id>\n",
            exit_status: 2,
        });
        map
    };
}

#[test]
fn test_all_simple_jcsh_scripts() {
    for (name, expected_data) in JCSH_SCRIPTS_MAP.iter() {
        let wd = WorkDir::new();
        let script = wd.create(name, expected_data.script);

        let output = wd
            .command(&[&script])
            .output()
            .expect("failed to run jcsh");
        assert_eq!(
            String::from_utf8_lossy(&output.stdout),
            expected_data.stdout,
            "stdout of {}",
            name
        );
        assert_eq!(
            String::from_utf8_lossy(&output.stderr),
            expected_data.stderr,
            "stderr of {}",
            name
        );
        assert_eq!(
            output.status.code(),
            Some(expected_data.exit_status),
            "exit status of {}",
            name
        );
    }
}

#[test]
fn test_command_string() {
    let wd = WorkDir::new();
    let output = wd.output(&mut wd.command(&["-c", "echo hello | tr a-z A-Z"]));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "HELLO\n");
}

#[test]
fn test_input_redirection_scenario() {
    let wd = WorkDir::new();
    wd.create("in.txt", "hello\n");
    wd.output(&mut wd.command(&["-c", "cat < in.txt > out.txt"]));
    assert_eq!(wd.read("out.txt"), "hello\n");
}

#[test]
fn test_background_job_is_started_without_waiting() {
    let wd = WorkDir::new();
    let start = Instant::now();
    let output = wd
        .command(&["-c", "sleep 5 > /dev/null &"])
        .stderr(Stdio::null())
        .output()
        .expect("failed to run jcsh");
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.starts_with("[Job 1] Started: sleep (PID: "),
        "unexpected output: {}",
        stdout
    );
    assert!(stdout.ends_with(")\n"), "unexpected output: {}", stdout);
}

#[test]
fn test_background_job_done_reported_once() {
    let wd = WorkDir::new();
    let script = wd.create(
        "background.jcsh",
        "sleep 0.2 &\nsleep 1\necho after\nsleep 0.1\n",
    );
    let output = wd.output(&mut wd.command(&[&script]));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(lines.len(), 3, "unexpected output: {}", stdout);
    assert!(lines[0].starts_with("[Job 1] Started: sleep (PID: "));
    assert_eq!(lines[1], "[Job 1] Done: sleep");
    assert_eq!(lines[2], "after");
}

#[test]
fn test_job_ids_increase_while_jobs_are_active() {
    let wd = WorkDir::new();
    let script = wd.create(
        "ids.jcsh",
        "sleep 0.5 &\nsleep 0.5 | cat &\njobs\nsleep 1\nsleep 0.1 &\n",
    );
    let output = wd.output(&mut wd.command(&[&script]));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();

    assert_eq!(lines.len(), 7, "unexpected output: {}", stdout);
    assert!(lines[0].starts_with("[Job 1] Started: sleep"));
    assert!(lines[1].starts_with("[Job 2] Started: sleep"));
    assert!(lines[2].starts_with("[1] ") && lines[2].ends_with(" sleep 0.5 \u{2014} Running"));
    assert!(lines[3].starts_with("[2] ") && lines[3].ends_with(" sleep 0.5 | cat \u{2014} Running"));
    assert_eq!(lines[4], "[Job 1] Done: sleep");
    assert_eq!(lines[5], "[Job 2] Done: sleep");
    assert!(lines[6].starts_with("[Job 1] Started: sleep"));
}

#[test]
fn test_version() {
    let wd = WorkDir::new();
    let output = wd.output(&mut wd.command(&["--version"]));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        format!("jcsh version {}\n", env!("CARGO_PKG_VERSION"))
    );
}
