use std::process::Command;

fn main() {
  println!("cargo:rerun-if-changed=.git/HEAD");

  let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
  let commit = git(&["rev-parse", "--short", "HEAD"]);

  println!("cargo:rustc-env=GIT_BRANCH={}", branch.as_deref().unwrap_or("unknown"));
  println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", commit.as_deref().unwrap_or("unknown"));
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
  (!s.is_empty()).then_some(s)
}
