// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line parsing for the rasterwerk demo.

use std::path::PathBuf;

use rasterwerk_core::error::{RasterwerkError, Result};

pub const USAGE: &str = "usage: rasterwerk <input.png> <output.png> [--config FILE] [--scale F] \
                         [--interpolate] [--matte R,G,B] [--chunk N]";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    /// Device pixels per image pixel.
    pub scale: f64,
    pub interpolate: bool,
    /// Soft-mask matte colour, components in `[0, 1]`.
    pub matte: Option<Vec<f32>>,
    /// Largest read the sample provider serves at once.
    pub chunk: Option<usize>,
}

impl Options {
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut positional = Vec::new();
        let mut config = None;
        let mut scale = 1.0;
        let mut interpolate = false;
        let mut matte = None;
        let mut chunk = None;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = Some(PathBuf::from(value(&mut args, &arg)?)),
                "--scale" => {
                    let text = value(&mut args, &arg)?;
                    scale = text
                        .parse::<f64>()
                        .ok()
                        .filter(|s| s.is_finite() && *s > 0.0)
                        .ok_or_else(|| invalid(format!("--scale expects a positive number, got {text}")))?;
                }
                "--interpolate" => interpolate = true,
                "--matte" => matte = Some(parse_matte(&value(&mut args, &arg)?)?),
                "--chunk" => {
                    let text = value(&mut args, &arg)?;
                    chunk = Some(
                        text.parse::<usize>()
                            .ok()
                            .filter(|n| *n > 0)
                            .ok_or_else(|| invalid(format!("--chunk expects a positive integer, got {text}")))?,
                    );
                }
                flag if flag.starts_with("--") => {
                    return Err(invalid(format!("unknown option {flag}")));
                }
                _ => positional.push(PathBuf::from(arg)),
            }
        }

        let [input, output] = <[PathBuf; 2]>::try_from(positional)
            .map_err(|_| invalid(USAGE.to_string()))?;
        Ok(Self {
            input,
            output,
            config,
            scale,
            interpolate,
            matte,
            chunk,
        })
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| invalid(format!("{flag} needs a value")))
}

fn parse_matte(text: &str) -> Result<Vec<f32>> {
    let components = text
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| invalid(format!("--matte: {e}")))?;
    if components.len() != 3 || components.iter().any(|c| !(0.0..=1.0).contains(c)) {
        return Err(invalid(
            "--matte expects three components between 0 and 1".to_string(),
        ));
    }
    Ok(components)
}

fn invalid(message: String) -> RasterwerkError {
    RasterwerkError::InvalidConfig(message)
}
