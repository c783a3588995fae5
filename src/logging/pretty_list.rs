use std::fmt;

/// Formats a slice as a numbered list with one entry per line.
///
/// Used for multiline log messages such as range set dumps. Debug output
/// honors the alternate flag for each entry.
pub struct PrettyList<'data, T>(pub &'data [T]);

impl<'data, T> PrettyList<'data, T> {
    fn write_entries<F>(&self, f: &mut fmt::Formatter<'_>, entry: F) -> fmt::Result
    where
        F: Fn(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
    {
        if self.0.is_empty() {
            return f.write_str(" (empty)");
        }
        let width = (self.0.len() - 1).to_string().len();
        for (index, item) in self.0.iter().enumerate() {
            write!(f, "\n{:>width$}. ", index, width = width)?;
            entry(f, item)?;
        }
        Ok(())
    }
}

impl<'data, T: fmt::Debug> fmt::Debug for PrettyList<'data, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alternate = f.alternate();
        self.write_entries(f, |f, item| {
            if alternate {
                write!(f, "{:#?}", item)
            } else {
                write!(f, "{:?}", item)
            }
        })
    }
}

impl<'data, T: fmt::Display> fmt::Display for PrettyList<'data, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_entries(f, |f, item| write!(f, "{}", item))
    }
}
