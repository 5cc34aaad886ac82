use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use smartcollect_parse::{ModuleParser, ParseError, ParsedModule};

/// Parses each module at most once per run.
pub struct ModuleCache {
    parser: ModuleParser,
    modules: HashMap<PathBuf, Arc<ParsedModule>>,
}

impl ModuleCache {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            parser: ModuleParser::new()?,
            modules: HashMap::new(),
        })
    }

    pub fn get(&mut self, path: &Path) -> Result<Arc<ParsedModule>, ParseError> {
        if let Some(module) = self.modules.get(path) {
            return Ok(Arc::clone(module));
        }

        let module = Arc::new(self.parser.parse_path(path)?);
        tracing::debug!(
            path = %path.display(),
            declarations = module.declarations.len(),
            imports = module.imports.len(),
            "parsed module"
        );
        self.modules.insert(path.to_path_buf(), Arc::clone(&module));
        Ok(module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
