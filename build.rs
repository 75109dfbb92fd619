use std::{fs, path::Path, process::Command};

fn main() {
  println!("cargo:rerun-if-changed=.git/HEAD");
  if Path::new(".git/refs/heads").exists() {
    println!("cargo:rerun-if-changed=.git/refs/heads");
  }

  let git = read_git_info();
  let short = git.commit.chars().take(7).collect::<String>();

  println!("cargo:rustc-env=GIT_BRANCH={}", git.branch);
  println!("cargo:rustc-env=GIT_COMMIT={}", git.commit);
  println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", short);
  println!("cargo:rustc-env=GIT_DIRTY={}", git.dirty);

  if let Some(version) = run_git(&["--version"], "rustc") {
    println!("cargo:rustc-env=RUST_VERSION={}", version);
  }
}

struct GitInfo {
  branch: String,
  commit: String,
  dirty: bool,
}

fn run_git(args: &[&str], program: &str) -> Option<String> {
  let output = Command::new(program).args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn read_git_info() -> GitInfo {
  let mut info = GitInfo {
    branch: run_git(&["rev-parse", "--abbrev-ref", "HEAD"], "git")
      .unwrap_or_else(|| "unknown".to_string()),
    commit: run_git(&["rev-parse", "HEAD"], "git").unwrap_or_else(|| "unknown".to_string()),
    dirty: run_git(&["status", "--porcelain"], "git")
      .map(|s| !s.is_empty())
      .unwrap_or(false),
  };

  // Fallback to manual parsing when git is not on PATH (e.g. container builds)
  if info.commit == "unknown" {
    if let Ok(head) = fs::read_to_string(".git/HEAD") {
      if let Some(ref_path) = head.strip_prefix("ref: ") {
        let ref_path = ref_path.trim();
        info.branch = ref_path.rsplit('/').next().unwrap_or("unknown").to_string();
        if let Ok(commit) = fs::read_to_string(format!(".git/{}", ref_path)) {
          info.commit = commit.trim().to_string();
        }
      } else {
        info.commit = head.trim().to_string();
      }
    }
  }

  info
}
