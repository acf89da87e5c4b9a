use std::io::Write;

use colored::Colorize;

/// Operator confirmation seam.  Destructive steps (token regeneration) go
/// through this so tests can script the answer.
pub trait Confirm: Send + Sync {
    fn ask(&self, message: &str) -> bool;
}

/// Interactive yes/no prompt on stdin.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn ask(&self, message: &str) -> bool {
        loop {
            print!("{} ", message.bold());
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return false;
            }
            match line.trim().to_lowercase().as_str() {
                "yes" | "y" => return true,
                "no" | "n" => return false,
                _ => println!("Please answer 'yes' or 'no'."),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(bool);

    impl Confirm for Always {
        fn ask(&self, _message: &str) -> bool {
            self.0
        }
    }

    #[test]
    fn canned_answers() {
        assert!(Always(true).ask("Do you want to continue? (yes/no):"));
        assert!(!Always(false).ask("Do you want to continue? (yes/no):"));
    }
}
