//! CLI command modules.

pub mod files;
pub mod transfer;
pub mod versions;

use anyhow::{Context, Result};

use ferry_core::{Digest, DigestAlgorithm, EncryptionKey};
use ferry_services::ConflictPolicy;

/// `--flag value` options shared by every command. Boolean flags carry no
/// value.
#[derive(Debug, Default)]
pub struct Flags {
    pub chunks: Option<usize>,
    pub key: Option<String>,
    pub rate: Option<u64>,
    pub digest: Option<String>,
    pub algo: Option<String>,
    pub policy: Option<String>,
    pub size: Option<u64>,
    pub count: Option<usize>,
    pub level: Option<i32>,
    pub retry: Option<Vec<usize>>,
    pub progress: bool,
    pub json: bool,
}

impl Flags {
    /// Pull known flags out of `args`, returning the positional remainder.
    pub fn parse(args: &[String]) -> Result<(Self, Vec<&str>)> {
        let mut flags = Flags::default();
        let mut positional = Vec::new();
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "--chunks" => {
                    flags.chunks = Some(value(args, &mut i, arg)?.parse().context("--chunks must be a number")?)
                }
                "--key" => flags.key = Some(value(args, &mut i, arg)?.to_string()),
                "--rate" => {
                    flags.rate = Some(value(args, &mut i, arg)?.parse().context("--rate must be bytes per second")?)
                }
                "--digest" => flags.digest = Some(value(args, &mut i, arg)?.to_string()),
                "--algo" => flags.algo = Some(value(args, &mut i, arg)?.to_string()),
                "--policy" => flags.policy = Some(value(args, &mut i, arg)?.to_string()),
                "--size" => flags.size = Some(value(args, &mut i, arg)?.parse().context("--size must be a number")?),
                "--count" => flags.count = Some(value(args, &mut i, arg)?.parse().context("--count must be a number")?),
                "--level" => flags.level = Some(value(args, &mut i, arg)?.parse().context("--level must be a number")?),
                "--retry" => flags.retry = Some(indices(value(args, &mut i, arg)?)?),
                "--progress" => flags.progress = true,
                "--json" => flags.json = true,
                _ => positional.push(arg),
            }
            i += 1;
        }
        Ok((flags, positional))
    }

    pub fn key(&self) -> Result<Option<EncryptionKey>> {
        self.key
            .as_deref()
            .map(|hex| EncryptionKey::from_hex(hex).context("invalid --key"))
            .transpose()
    }

    pub fn require_key(&self) -> Result<EncryptionKey> {
        self.key()?.context("--key <hex> is required")
    }

    pub fn digest(&self) -> Option<Digest> {
        self.digest.as_deref().map(Digest::from_hex)
    }

    /// `--algo`, falling back to the configured algorithm.
    pub fn algorithm(&self, default: DigestAlgorithm) -> Result<DigestAlgorithm> {
        match self.algo.as_deref() {
            Some(name) => name.parse().context("invalid --algo"),
            None => Ok(default),
        }
    }

    /// `--policy`, falling back to the configured policy.
    pub fn policy(&self, default: &str) -> Result<ConflictPolicy> {
        self.policy
            .as_deref()
            .unwrap_or(default)
            .parse::<ConflictPolicy>()
            .map_err(anyhow::Error::msg)
    }
}

/// `1,3,4` → `[1, 3, 4]`.
fn indices(list: &str) -> Result<Vec<usize>> {
    list.split(',')
        .map(|s| s.trim().parse().with_context(|| format!("bad chunk index {s:?} in --retry")))
        .collect()
}

/// Advance past a flag and return its value.
fn value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{name} requires a value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_are_separated_from_positionals() {
        let raw = args(&["send", "a.bin", "--chunks", "4", "host:9000", "--json"]);
        let (flags, positional) = Flags::parse(&raw).unwrap();
        assert_eq!(positional, vec!["send", "a.bin", "host:9000"]);
        assert_eq!(flags.chunks, Some(4));
        assert!(flags.json);
    }

    #[test]
    fn missing_or_bad_values_are_errors() {
        assert!(Flags::parse(&args(&["send", "--chunks"])).is_err());
        assert!(Flags::parse(&args(&["send", "--rate", "fast"])).is_err());
    }

    #[test]
    fn policy_and_algorithm_fall_back_to_config() {
        let (flags, _) = Flags::parse(&args(&["fetch"])).unwrap();
        assert_eq!(flags.policy("abort").unwrap(), ConflictPolicy::Abort);
        assert_eq!(
            flags.algorithm(DigestAlgorithm::Blake3).unwrap(),
            DigestAlgorithm::Blake3
        );

        let (flags, _) = Flags::parse(&args(&["fetch", "--policy", "nope"])).unwrap();
        assert!(flags.policy("backup").is_err());
    }

    #[test]
    fn retry_takes_a_comma_separated_index_list() {
        let argv = args(&["send", "f", "h:1", "--chunks", "4", "--retry", "1, 3"]);
        let (flags, positional) = Flags::parse(&argv).unwrap();
        assert_eq!(positional, vec!["send", "f", "h:1"]);
        assert_eq!(flags.retry, Some(vec![1, 3]));

        assert!(Flags::parse(&args(&["send", "--retry", "1,x"])).is_err());
        assert!(Flags::parse(&args(&["send", "--retry"])).is_err());
    }

    #[test]
    fn short_key_is_rejected() {
        let (flags, _) = Flags::parse(&args(&["encrypt", "--key", "0011"])).unwrap();
        assert!(flags.key().is_err());
    }
}
