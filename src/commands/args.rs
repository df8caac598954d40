use super::descriptor::{AcceptedCounts, ArgContract, SplitRule};
use std::collections::BTreeSet;

impl SplitRule {
    /// Splits the text after the command name. Pieces are trimmed and empty
    /// pieces dropped, so blank input always yields no arguments.
    pub fn split(self, rest: &str) -> Vec<String> {
        let pieces: Box<dyn Iterator<Item = &str>> = match self {
            Self::None => Box::new(std::iter::once(rest)),
            Self::Whitespace => Box::new(rest.split_whitespace()),
            Self::Comma => Box::new(rest.split(',')),
            Self::Newline => Box::new(rest.lines()),
        };
        pieces
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl AcceptedCounts {
    /// Bit `n` of `mask` accepts exactly `n` arguments. Zero means no check.
    pub fn from_mask(mask: u32) -> Option<Self> {
        if mask == 0 {
            return None;
        }
        let set: BTreeSet<usize> = (0..32usize).filter(|n| mask & (1 << n) != 0).collect();
        Some(Self::Exact(set))
    }

    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Self::Exact(set) => set.contains(&n),
            Self::Range { min, max } => (*min..=*max).contains(&n),
        }
    }

    fn min(&self) -> usize {
        match self {
            Self::Exact(set) => set.first().copied().unwrap_or(0),
            Self::Range { min, .. } => *min,
        }
    }

    fn max(&self) -> usize {
        match self {
            Self::Exact(set) => set.last().copied().unwrap_or(0),
            Self::Range { max, .. } => *max,
        }
    }

    fn describe_expected(&self, got: usize) -> String {
        if got < self.min() {
            return format!("at least {}", self.min());
        }
        if got > self.max() {
            return format!("at most {}", self.max());
        }
        match self {
            Self::Exact(set) => {
                let list: Vec<String> = set.iter().map(ToString::to_string).collect();
                format!("one of {}", list.join(","))
            }
            Self::Range { min, max } => format!("between {min} and {max}"),
        }
    }
}

impl ArgContract {
    /// Splits `rest` and checks the count. The error is the message shown
    /// to the user.
    pub fn parse(&self, rest: &str) -> Result<Vec<String>, String> {
        let args = self.split.split(rest);
        if !self.enabled {
            return Ok(args);
        }
        let Some(counts) = &self.counts else {
            return Ok(args);
        };
        if counts.accepts(args.len()) {
            return Ok(args);
        }

        let mut message = format!(
            "Invalid number of arguments. Expected {} arguments. But got {}.",
            counts.describe_expected(args.len()),
            args.len()
        );
        if let Some(usage) = self.usage.as_deref().filter(|u| !u.is_empty()) {
            message.push_str(" Usage: ");
            message.push_str(usage);
        }
        Err(message)
    }
}
