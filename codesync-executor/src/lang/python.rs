use super::*;

pub static DESCRIPTOR: LanguageDescriptor = LanguageDescriptor {
    id: LanguageId::Python,
    source_file_name: "solution.py",
    compile: None,
    run: Template {
        program: "python3",
        args: &["{src}"],
    },
};
