use super::*;

pub static DESCRIPTOR: LanguageDescriptor = LanguageDescriptor {
    id: LanguageId::JavaScript,
    source_file_name: "solution.js",
    compile: None,
    run: Template {
        program: "node",
        args: &["{src}"],
    },
};
