use anyhow::{Result, bail};
use std::io::{self, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "TRANQUIL_PASSWORD";

pub fn read_password() -> Result<Zeroizing<String>> {
    //  Environment Variable
    //  TRANQUIL_PASSWORD="supersecret" tranquil ids --identifier alice
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    //  stdin (Pipeline)
    //  echo "supersecret" | tranquil ids --identifier alice
    if !io::stdin().is_terminal() {
        let mut buf = Zeroizing::new(String::new());
        io::stdin().read_line(&mut buf)?;
        trim_newline(&mut buf);

        if !buf.is_empty() {
            return Ok(buf);
        }
    }

    //  Interactive (TTY)
    if io::stdin().is_terminal() {
        let pw = Zeroizing::new(rpassword::prompt_password("Master password: ")?);
        if !pw.is_empty() {
            return Ok(pw);
        }
    }

    bail!("No master password provided")
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
