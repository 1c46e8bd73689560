use csm_core::{ObjectKey, SmolStr, TextRange, TextSize, Uid};
use csm_storage::{DataInput, DataOutput, Persistent, StorageError};

/// The role of an identifier occurrence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReferenceKind {
    Declaration = 0,
    Definition = 1,
    Usage = 2,
    TypeUsage = 3,
    MacroUsage = 4,
    Include = 5,
}

impl ReferenceKind {
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Declaration,
            1 => Self::Definition,
            2 => Self::Usage,
            3 => Self::TypeUsage,
            4 => Self::MacroUsage,
            5 => Self::Include,
            _ => return None,
        })
    }
}

impl Persistent for ReferenceKind {
    fn write(&self, out: &mut DataOutput) {
        out.write_u8(self.tag());
    }

    fn read(input: &mut DataInput<'_>) -> Result<Self, StorageError> {
        let tag = input.read_u8()?;
        Self::from_tag(tag).ok_or(StorageError::InvalidTag {
            what: "reference kind",
            tag,
        })
    }
}

fn write_range(out: &mut DataOutput, range: TextRange) {
    out.write_u32(range.start().into());
    out.write_u32(range.end().into());
}

fn read_range(input: &mut DataInput<'_>) -> Result<TextRange, StorageError> {
    let start = input.read_u32()?;
    let end = input.read_u32()?;
    if end < start {
        return Err(StorageError::InvalidHeader("range end before start"));
    }
    Ok(TextRange::new(TextSize::from(start), TextSize::from(end)))
}

/// An `#include` directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Include {
    pub path: SmolStr,
    /// `<...>` rather than `"..."`.
    pub system: bool,
    pub range: TextRange,
    /// The included file, when resolution succeeded.
    pub resolved: Option<Uid>,
}

impl Include {
    pub fn new(path: impl Into<SmolStr>, system: bool, range: TextRange) -> Self {
        Self {
            path: path.into(),
            system,
            range,
            resolved: None,
        }
    }

    pub fn resolved_to(mut self, file: Uid) -> Self {
        self.resolved = Some(file);
        self
    }

    pub fn key(&self, file: Uid) -> ObjectKey {
        ObjectKey::include(file, self.range.start().into())
    }

    /// The directive text as written, e.g. `<vector>` or `"util.h"`.
    pub fn spelling(&self) -> String {
        if self.system {
            format!("<{}>", self.path)
        } else {
            format!("\"{}\"", self.path)
        }
    }
}

impl Persistent for Include {
    fn write(&self, out: &mut DataOutput) {
        out.write_str(&self.path);
        out.write_bool(self.system);
        write_range(out, self.range);
        out.write_opt_uid(self.resolved);
    }

    fn read(input: &mut DataInput<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            path: input.read_str()?,
            system: input.read_bool()?,
            range: read_range(input)?,
            resolved: input.read_opt_uid()?,
        })
    }
}

/// A `#define` in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Macro {
    pub name: SmolStr,
    pub range: TextRange,
    /// `None` for object-like macros.
    pub parameters: Option<Vec<SmolStr>>,
    pub body: SmolStr,
}

impl Macro {
    pub fn object_like(name: impl Into<SmolStr>, range: TextRange, body: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            range,
            parameters: None,
            body: body.into(),
        }
    }

    pub fn function_like(
        name: impl Into<SmolStr>,
        range: TextRange,
        parameters: impl IntoIterator<Item = impl Into<SmolStr>>,
        body: impl Into<SmolStr>,
    ) -> Self {
        Self {
            name: name.into(),
            range,
            parameters: Some(parameters.into_iter().map(Into::into).collect()),
            body: body.into(),
        }
    }

    pub fn key(&self, file: Uid) -> ObjectKey {
        ObjectKey::macro_definition(file, self.range.start().into(), self.name.clone())
    }

    pub fn start(&self) -> u32 {
        self.range.start().into()
    }
}

impl Persistent for Macro {
    fn write(&self, out: &mut DataOutput) {
        out.write_str(&self.name);
        write_range(out, self.range);
        match &self.parameters {
            Some(params) => {
                out.write_bool(true);
                out.write_len(params.len());
                for param in params {
                    out.write_str(param);
                }
            }
            None => out.write_bool(false),
        }
        out.write_str(&self.body);
    }

    fn read(input: &mut DataInput<'_>) -> Result<Self, StorageError> {
        let name = input.read_str()?;
        let range = read_range(input)?;
        let parameters = if input.read_bool()? {
            let len = input.read_len(4)?;
            Some((0..len).map(|_| input.read_str()).collect::<Result<_, _>>()?)
        } else {
            None
        };
        Ok(Self {
            name,
            range,
            parameters,
            body: input.read_str()?,
        })
    }
}

/// A template instantiation attributed to a file, e.g. `std::vector<int>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instantiation {
    pub template: Uid,
    pub arguments: SmolStr,
    pub range: TextRange,
}

impl Instantiation {
    pub fn new(template: Uid, arguments: impl Into<SmolStr>, range: TextRange) -> Self {
        Self {
            template,
            arguments: arguments.into(),
            range,
        }
    }

    pub fn key(&self, file: Uid) -> ObjectKey {
        let text = format!("{}<{}>", self.template, self.arguments);
        ObjectKey::instantiation(file, self.range.start().into(), text)
    }
}

impl Persistent for Instantiation {
    fn write(&self, out: &mut DataOutput) {
        out.write_uid(self.template);
        out.write_str(&self.arguments);
        write_range(out, self.range);
    }

    fn read(input: &mut DataInput<'_>) -> Result<Self, StorageError> {
        Ok(Self {
            template: input.read_uid()?,
            arguments: input.read_str()?,
            range: read_range(input)?,
        })
    }
}
