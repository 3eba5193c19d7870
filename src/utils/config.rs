use std::path::PathBuf;

use anyhow::{Context, bail};

use crate::canvas::history::DEFAULT_MAX_HISTORY;
use crate::canvas::pool::DEFAULT_POOL_CAPACITY;
use crate::canvas::session::HistoryBackend;

/// Knobs for an [`EditHistory`](crate::EditHistory).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Transactions kept before the oldest is evicted.
    pub max_entries: usize,
    /// Free blocks the pool retains.
    pub pool_capacity: usize,
    pub backend: HistoryBackend,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_HISTORY,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            backend: HistoryBackend::default(),
        }
    }
}

impl HistoryConfig {
    pub fn with_backend(mut self, backend: HistoryBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Region given as `x,y,w,h`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Command-line options of the headless driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub config: HistoryConfig,
    pub deletes: Vec<Region>,
    pub undo: usize,
    pub redo: usize,
    pub random_edits: usize,
    /// Image size for the backend comparison run.
    pub compare: Option<(u32, u32)>,
}

fn parse_region(value: &str) -> anyhow::Result<Region> {
    let parts: Vec<i32> = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid region '{value}'"))?;
    match parts.as_slice() {
        &[x, y, w, h] => Ok(Region { x, y, w, h }),
        _ => bail!("region '{value}' must be x,y,w,h"),
    }
}

fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("size '{value}' must be WIDTHxHEIGHT"))?;
    let w = w.parse().with_context(|| format!("invalid width in '{value}'"))?;
    let h = h.parse().with_context(|| format!("invalid height in '{value}'"))?;
    Ok((w, h))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next().with_context(|| format!("{flag} expects a value"))
}

fn parse_count(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<usize> {
    let value = next_value(args, flag)?;
    value
        .parse()
        .with_context(|| format!("{flag} expects a number, got '{value}'"))
}

/// Parse driver arguments (without the program name).
///
/// Positional arguments are the input and output image paths, in that order.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<RunOptions> {
    let mut options = RunOptions::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--delta" | "--backend=delta" => options.config.backend = HistoryBackend::Delta,
            "--snapshot" | "--backend=snapshot" => {
                options.config.backend = HistoryBackend::Snapshot
            }
            "--backend" => {
                let value = next_value(&mut args, "--backend")?;
                options.config.backend = value.parse().map_err(anyhow::Error::msg)?;
            }
            "--max-history" => {
                options.config.max_entries = parse_count(&mut args, "--max-history")?
            }
            "--pool-capacity" => {
                options.config.pool_capacity = parse_count(&mut args, "--pool-capacity")?
            }
            "--delete" => {
                let value = next_value(&mut args, "--delete")?;
                options.deletes.push(parse_region(&value)?);
            }
            "--undo" => options.undo = parse_count(&mut args, "--undo")?,
            "--redo" => options.redo = parse_count(&mut args, "--redo")?,
            "--random-edits" => {
                options.random_edits = parse_count(&mut args, "--random-edits")?
            }
            "--compare" => {
                let value = next_value(&mut args, "--compare")?;
                options.compare = Some(parse_size(&value)?);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'"),
            _ => {
                if options.input.is_none() {
                    options.input = Some(PathBuf::from(&arg));
                } else if options.output.is_none() {
                    options.output = Some(PathBuf::from(&arg));
                } else {
                    bail!("unexpected argument '{arg}'");
                }
            }
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults() {
        let options = parse_args(Vec::new()).unwrap();
        assert_eq!(options.config, HistoryConfig::default());
        assert_eq!(options.config.max_entries, 50);
        assert_eq!(options.config.pool_capacity, 1000);
        assert!(options.input.is_none());
    }

    #[test]
    fn parses_full_command_line() {
        let options = parse_args(args(&[
            "in.png",
            "--backend",
            "snapshot",
            "--max-history",
            "20",
            "--delete",
            "500,500,100,100",
            "--delete",
            "-5, 0, 10, 10",
            "--undo",
            "2",
            "out.png",
        ]))
        .unwrap();
        assert_eq!(options.input, Some(PathBuf::from("in.png")));
        assert_eq!(options.output, Some(PathBuf::from("out.png")));
        assert_eq!(options.config.backend, HistoryBackend::Snapshot);
        assert_eq!(options.config.max_entries, 20);
        assert_eq!(options.deletes.len(), 2);
        assert_eq!(
            options.deletes[1],
            Region {
                x: -5,
                y: 0,
                w: 10,
                h: 10
            }
        );
        assert_eq!(options.undo, 2);
    }

    #[test]
    fn compare_size() {
        let options = parse_args(args(&["--compare", "1024x768"])).unwrap();
        assert_eq!(options.compare, Some((1024, 768)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(args(&["--delete", "1,2,3"])).is_err());
        assert!(parse_args(args(&["--undo"])).is_err());
        assert!(parse_args(args(&["--backend", "tiles"])).is_err());
        assert!(parse_args(args(&["--frobnicate"])).is_err());
        assert!(parse_args(args(&["a", "b", "c"])).is_err());
    }
}
