use anyhow::{Context, Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "SCRYPTENC_PASSWORD";

/// Where the password may be read from, given what stdin is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdin {
    /// stdin carries the data to encrypt or decrypt.
    Data,
    /// stdin is free for a piped password.
    Free,
}

impl Stdin {
    fn piped_password(self) -> bool {
        self == Stdin::Free && !io::stdin().is_terminal()
    }
}

fn from_env() -> Option<Zeroizing<String>> {
    //  SCRYPTENC_PASSWORD="supersecret" scryptenc dec secret.enc
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

pub fn read_password(stdin: Stdin) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env() {
        return Ok(pw);
    }

    //  printf "%s" "$PW" | scryptenc verify password.rec
    if stdin.piped_password() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);
        if buf.is_empty() {
            bail!("no password provided");
        }
        return Ok(buf);
    }

    let pw = Zeroizing::new(
        rpassword::prompt_password("Please enter passphrase: ")
            .context("unable to read passphrase from terminal")?,
    );
    if pw.is_empty() {
        bail!("no password provided");
    }
    Ok(pw)
}

pub fn read_new_password_with_confirmation(stdin: Stdin) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env() {
        return Ok(pw);
    }

    let (pw1, pw2) = if stdin.piped_password() {
        let mut handle = io::stdin().lock();
        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());
        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;
        trim_newline(&mut pw1);
        trim_newline(&mut pw2);
        (pw1, pw2)
    } else {
        let pw1 = Zeroizing::new(
            rpassword::prompt_password("Please enter passphrase: ")
                .context("unable to read passphrase from terminal")?,
        );
        let pw2 = Zeroizing::new(rpassword::prompt_password("Please confirm passphrase: ")?);
        (pw1, pw2)
    };

    if pw1.is_empty() {
        bail!("password cannot be empty");
    }
    if pw1 != pw2 {
        bail!("passwords mismatch");
    }
    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
