use crate::config::DESCRIPTION_MAX_DEPTH;
use crate::core::Value;
use crate::schema::PropertyDescriptor;
use std::fmt::{self, Write};

use super::ObjectAccessor;

fn indent(f: &mut impl Write, level: usize) -> fmt::Result {
    for _ in 0..level {
        f.write_char('\t')?;
    }
    Ok(())
}

impl ObjectAccessor {
    /// Multi-line description, following links up to the session's
    /// `description_max_depth`.
    ///
    /// ```text
    /// Dog {
    ///     name = "Rex";
    ///     owner = Person {
    ///         name = "Ann";
    ///     };
    /// }
    /// ```
    pub fn describe(&self) -> String {
        self.to_string()
    }

    fn max_depth(&self) -> usize {
        self.live_session()
            .map(|(session, _)| session.config().description_max_depth)
            .unwrap_or(DESCRIPTION_MAX_DEPTH)
    }

    fn describe_into(&self, f: &mut impl Write, depth: usize, level: usize) -> fmt::Result {
        writeln!(f, "{} {{", self.type_name())?;
        for property in self.schema().properties() {
            indent(f, level + 1)?;
            write!(f, "{} = ", property.name)?;
            match self.read_property(&property.name) {
                Ok(value) => self.describe_value(f, property, &value, depth, level + 1)?,
                Err(_) => f.write_str("<invalid>")?,
            }
            writeln!(f, ";")?;
        }
        indent(f, level)?;
        f.write_char('}')
    }

    fn describe_value(
        &self,
        f: &mut impl Write,
        property: &PropertyDescriptor,
        value: &Value,
        depth: usize,
        level: usize,
    ) -> fmt::Result {
        let target = property.object_type.as_deref().unwrap_or("Object");
        match value {
            Value::Link(_) if depth == 0 => write!(f, "<{}>", target),
            Value::Link(link) => match self.follow(property, link) {
                Ok(object) => object.describe_into(f, depth - 1, level),
                Err(_) => write!(f, "{}", link),
            },
            Value::List(items) if property.object_type.is_some() => {
                let kind = if property.is_computed() {
                    "LinkingObjects"
                } else {
                    "List"
                };
                write!(f, "{}<{}> (", kind, target)?;
                for (idx, item) in items.iter().enumerate() {
                    writeln!(f)?;
                    indent(f, level + 1)?;
                    write!(f, "[{}] ", idx)?;
                    self.describe_value(f, property, item, depth, level + 1)?;
                }
                if !items.is_empty() {
                    writeln!(f)?;
                    indent(f, level)?;
                }
                f.write_char(')')
            }
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for ObjectAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalidated() {
            return f.write_str("[invalid object]");
        }
        self.describe_into(f, self.max_depth(), 0)
    }
}
