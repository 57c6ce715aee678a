use super::*;

pub static DESCRIPTOR: LanguageDescriptor = LanguageDescriptor {
    id: LanguageId::Cpp,
    source_file_name: "solution.cpp",
    compile: Some(Template {
        program: "g++",
        args: &["-O2", "-o", "{exe}", "{src}"],
    }),
    run: Template {
        program: "{exe}",
        args: &[],
    },
};
