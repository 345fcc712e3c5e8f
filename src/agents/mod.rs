mod hint;
mod notes;
mod persona;
mod prompts;
mod scenario_writer;

pub use hint::*;
pub use notes::*;
pub use persona::*;
pub use prompts::*;
pub use scenario_writer::*;
