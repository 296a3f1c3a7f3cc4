use gl_generator::{Api, Fallbacks, Profile, Registry, StructGenerator};
use std::env;
use std::fs::File;
use std::path::Path;

fn main() {
    let dest = env::var("OUT_DIR").unwrap();
    let mut file = File::create(Path::new(&dest).join("bindings.rs")).unwrap();

    // 4.5 core with fallbacks; the device degrades through the capability
    // record when the context reports less (or an ES profile). SPIR-V
    // consumption is an extension at this version.
    Registry::new(
        Api::Gl,
        (4, 5),
        Profile::Core,
        Fallbacks::All,
        ["GL_ARB_gl_spirv", "GL_ARB_spirv_extensions"],
    )
    .write_bindings(StructGenerator, &mut file)
    .unwrap();
}
