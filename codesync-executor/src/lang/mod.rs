pub mod cpp;
pub mod java;
pub mod javascript;
pub mod python;

use codesync_protocol::error::ExecError;
use codesync_utils::os_cmd::OsCmd;

use std::borrow::Cow;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    Cpp,
    Python,
    JavaScript,
    Java,
}

impl LanguageId {
    pub const ALL: [LanguageId; 4] = [
        LanguageId::Cpp,
        LanguageId::Python,
        LanguageId::JavaScript,
        LanguageId::Java,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LanguageId::Cpp => "cpp",
            LanguageId::Python => "python",
            LanguageId::JavaScript => "javascript",
            LanguageId::Java => "java",
        }
    }

    pub fn descriptor(self) -> &'static LanguageDescriptor {
        match self {
            LanguageId::Cpp => &cpp::DESCRIPTOR,
            LanguageId::Python => &python::DESCRIPTOR,
            LanguageId::JavaScript => &javascript::DESCRIPTOR,
            LanguageId::Java => &java::DESCRIPTOR,
        }
    }
}

impl FromStr for LanguageId {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpp" => Ok(LanguageId::Cpp),
            "python" => Ok(LanguageId::Python),
            "javascript" => Ok(LanguageId::JavaScript),
            "java" => Ok(LanguageId::Java),
            _ => Err(ExecError::UnsupportedLanguage(s.to_owned())),
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejects unknown languages before anything is spawned.
pub fn lookup(language: &str) -> Result<&'static LanguageDescriptor, ExecError> {
    let id: LanguageId = language.parse()?;
    Ok(id.descriptor())
}

/// An argv template. Arguments equal to `{src}`, `{exe}`, `{out}` or `{main}` are substituted.
#[derive(Debug)]
pub struct Template {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

pub struct TemplateVars<'a> {
    pub src: &'a Path,
    pub exe: &'a Path,
    pub out: &'a Path,
    pub main: &'a str,
}

impl Template {
    /// Builds the command. `resolve` maps a literal program name to the binary to execute.
    pub fn expand(&self, vars: &TemplateVars<'_>, resolve: impl FnOnce(&str) -> PathBuf) -> OsCmd {
        let mut cmd = match vars.substitute(self.program) {
            Some(program) => OsCmd::new(program),
            None => OsCmd::new(resolve(self.program)),
        };
        for &arg in self.args {
            match vars.substitute(arg) {
                Some(value) => cmd.arg(value),
                None => cmd.arg(arg),
            };
        }
        cmd
    }
}

impl TemplateVars<'_> {
    fn substitute(&self, token: &str) -> Option<&OsStr> {
        match token {
            "{src}" => Some(self.src.as_os_str()),
            "{exe}" => Some(self.exe.as_os_str()),
            "{out}" => Some(self.out.as_os_str()),
            "{main}" => Some(OsStr::new(self.main)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct LanguageDescriptor {
    pub id: LanguageId,
    pub source_file_name: &'static str,
    pub compile: Option<Template>,
    pub run: Template,
}

impl LanguageDescriptor {
    /// File name the source must be written under. Java needs the public class name.
    pub fn source_name(&self, code: &str) -> Cow<'static, str> {
        match self.id {
            LanguageId::Java => Cow::Owned(format!("{}.java", java::source_class(code))),
            _ => Cow::Borrowed(self.source_file_name),
        }
    }

    pub fn main_class<'a>(&self, code: &'a str) -> &'a str {
        match self.id {
            LanguageId::Java => java::main_class(code),
            _ => "",
        }
    }
}
