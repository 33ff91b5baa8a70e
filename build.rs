use std::{
    env,
    fs::File,
    io::{self, Read, Write},
    path::Path,
    process::Command,
};

fn main() {
    match write_version_file() {
        Ok(_) => {}
        Err(e) => panic!("Failed to create a version file: {:?}", e),
    }
}

fn write_version_file() -> io::Result<()> {
    let version = env::var("CARGO_PKG_VERSION").unwrap();
    let target = env::var("TARGET").unwrap();
    let version_fname = Path::new(&env::var("OUT_DIR").unwrap()).join("version_string");
    let mut version_file = File::create(&version_fname)?;
    write!(&mut version_file, "r#\"ion-pipe {} ({})\nrev {}\"#", version, target, get_git_rev())?;
    Ok(())
}

fn get_git_rev() -> String {
    let from_git = Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok());

    from_git
        .or_else(|| git_rev_from_file().ok())
        .map(|rev| rev.trim().to_owned())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

fn git_rev_from_file() -> io::Result<String> {
    let git_dir = Path::new(&env::var("CARGO_MANIFEST_DIR").unwrap()).join(".git");
    let mut head = String::new();
    File::open(git_dir.join("HEAD"))?.read_to_string(&mut head)?;

    // HEAD either names a branch ref or holds a detached commit.
    match head.trim().strip_prefix("ref: ") {
        Some(reference) => {
            let mut rev = String::new();
            File::open(git_dir.join(reference))?.read_to_string(&mut rev)?;
            Ok(rev)
        }
        None => Ok(head),
    }
}
