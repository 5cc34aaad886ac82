mod parser;
mod python;

pub use parser::{
    ClassMethod, Declaration, DeclarationKind, ImportStatement, ImportStyle, ImportedName,
    ModuleParser, ParseError, ParsedModule, decorator_name,
};
