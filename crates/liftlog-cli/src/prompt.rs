//! Interactive terminal input.

use std::io::{self, BufRead, Write};

use anyhow::Result;

/// Read one trimmed line after printing `label`
pub fn line(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Like `line`, but an empty answer yields `default`
pub fn line_or(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => {
            let answer = line(&format!("{label} [{default}]"))?;
            Ok(if answer.is_empty() {
                default.to_string()
            } else {
                answer
            })
        }
        None => line(label),
    }
}

/// Read a password without echo
pub fn password(label: &str) -> Result<String> {
    let password = rpassword::prompt_password(format!("{label}: "))?;
    Ok(password)
}
