//! Reading the calling thread's mount table

use std::path::PathBuf;

use netscope_core::Result;

const THREAD_SELF_MOUNTS: &str = "/proc/thread-self/mounts";

/// Raw contents of the calling thread's mount table
///
/// # Errors
/// Returns error if the mount table cannot be read
pub fn dump_mounts() -> Result<String> {
    Ok(std::fs::read_to_string(THREAD_SELF_MOUNTS)?)
}

/// Mount points of the calling thread's mount table, in mount order
///
/// # Errors
/// Returns error if the mount table cannot be read
pub fn mounted_targets() -> Result<Vec<PathBuf>> {
    Ok(parse_targets(&dump_mounts()?))
}

fn parse_targets(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape(field)))
        .collect()
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and `\`
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        let table = "proc /proc proc rw,nosuid 0 0\n\
                     /dev/sda1 /mnt/my\\040disk ext4 rw 0 0\n\
                     tmpfs /etc/resolv.conf tmpfs rw 0 0\n";

        assert_eq!(
            parse_targets(table),
            vec![
                PathBuf::from("/proc"),
                PathBuf::from("/mnt/my disk"),
                PathBuf::from("/etc/resolv.conf"),
            ]
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\011b"), "a\tb");
        assert_eq!(unescape("back\\134slash"), "back\\slash");
        assert_eq!(unescape("trailing\\04"), "trailing\\04");
        assert_eq!(unescape("plain"), "plain");
    }

    #[test]
    fn test_own_mount_table_has_root() {
        let targets = mounted_targets().unwrap();
        assert!(targets.contains(&PathBuf::from("/")));
    }
}
