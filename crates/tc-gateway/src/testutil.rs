//! Fake agent executables for process-level tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use uuid::Uuid;

/// Write `body` as an executable `/bin/sh` script in the temp dir.
pub fn fake_agent(body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("tc-fake-agent-{}.sh", Uuid::new_v4().simple()));
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake agent");
    let mut perms = fs::metadata(&path).expect("stat fake agent").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake agent");
    path
}

/// True for the transient "text file busy" error a concurrent fork in another
/// test thread can cause right after the script was written.
pub fn is_text_busy(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

/// Emits init, one line of text and a result, then exits.
pub const HAPPY_PATH: &str = r#"cat <<'EOF'
{"type":"init","session_id":"s1"}
{"type":"assistant","message":{"content":[{"type":"text","text":"Files: a.txt, b.txt"}]}}
{"type":"result","result":"Done","cost_usd":0.01}
EOF"#;

/// Asks to run a dangerous command, waits for y/n on the terminal and echoes
/// the answer back in its result.
pub const DANGEROUS_BASH: &str = r#"cat <<'EOF'
{"type":"init","session_id":"s2"}
{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"rm -rf build"}}
EOF
read answer
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"answer=%s"}]}}\n' "$answer"
printf '{"type":"result","result":"%s","cost_usd":0.02}\n' "$answer""#;

/// Prints init, then blocks until signalled.
pub const SLEEPER: &str = r#"echo '{"type":"init","session_id":"s3"}'
sleep 30"#;

/// Asks to run a dangerous command, then floods 700 text lines and a result
/// without waiting for an answer, so the backlog sits behind the tool call.
pub const BURST_BEHIND_TOOL: &str = r#"cat <<'EOF'
{"type":"init","session_id":"s4"}
{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"rm -rf build"}}
EOF
i=1
while [ "$i" -le 700 ]; do
  printf '{"type":"assistant","message":{"content":[{"type":"text","text":"line %s"}]}}\n' "$i"
  i=$((i + 1))
done
echo '{"type":"result","result":"Done","cost_usd":0.05}'"#;

/// Prints init and sleeps without reacting to SIGINT.
pub const IGNORES_INTERRUPT: &str = r#"trap '' INT
echo '{"type":"init","session_id":"s6"}'
sleep 30"#;

/// Leaves a background child holding the terminal after the agent exits.
/// The child ignores the hangup sent when the leader goes away; its pid is
/// written to `pidfile`.
pub fn orphaning_agent(pidfile: &std::path::Path) -> String {
    format!(
        r#"trap '' HUP
sleep 30 &
echo $! > '{}'
echo '{{"type":"init","session_id":"s5"}}'"#,
        pidfile.display()
    )
}
