use rustc_hash::FxHashMap;

/// A hand-rolled argv parser, grounded in
/// `original_source/src/core/SwCoreApplication.h`'s `parseArguments`. CLI
/// parsing is explicitly out of scope for the core (§6), so this stays a
/// small standalone collaborator rather than pulling in `clap`.
///
/// Recognises `--key=value`, `--key value`, `-k value`, and bare
/// positionals. A `--flag`/`-f` not followed by a value (the next token is
/// itself a flag, or there is no next token) is recorded with an empty
/// string value, matching a boolean-flag usage.
#[derive(Debug, Default, Clone)]
pub struct Args {
    flags: FxHashMap<String, String>,
    positionals: Vec<String>,
}

impl Args {
    /// Parses `argv[1..]` (the caller passes the full `std::env::args()`
    /// iterator, including argv[0], which is skipped).
    pub fn parse(argv: impl IntoIterator<Item = String>) -> Self {
        let mut flags = FxHashMap::default();
        let mut positionals = Vec::new();
        let mut iter = argv.into_iter().skip(1).peekable();

        while let Some(arg) = iter.next() {
            let Some(key) = strip_flag_prefix(&arg) else {
                positionals.push(arg);
                continue;
            };
            if let Some((k, v)) = key.split_once('=') {
                flags.insert(k.to_string(), v.to_string());
                continue;
            }
            let value = match iter.peek() {
                Some(next) if strip_flag_prefix(next).is_none() => iter.next().unwrap(),
                _ => String::new(),
            };
            flags.insert(key.to_string(), value);
        }

        Self { flags, positionals }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }
}

fn strip_flag_prefix(arg: &str) -> Option<&str> {
    arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))
}
