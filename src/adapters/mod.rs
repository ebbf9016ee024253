use std::sync::Arc;

use crate::core::drives::DriveFs;

mod local;
mod simulated;

pub use local::LocalFs;
pub use simulated::{SimulatedFs, Simulator};

/// Pick the filesystem backend.
///
/// In simulation mode drives are driven from stdin:
/// `attach <name> <dir>` and `detach <name>`.
pub fn get_drive_fs(simulation: bool) -> Arc<dyn DriveFs> {
    if simulation {
        let (fs, controller) = SimulatedFs::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines() {
                let Ok(cmd) = line else { break };
                let parts: Vec<&str> = cmd.split_whitespace().collect();
                match parts.as_slice() {
                    ["attach", name, dir] => controller.attach(name, *dir),
                    ["detach", name] => controller.detach(name),
                    ["list"] => println!("(Simulator) Attached: {:?}", controller.attached()),
                    _ => println!("(Simulator) Use: 'attach <name> <dir>', 'detach <name>' or 'list'"),
                }
            }
        });

        return Arc::new(fs);
    }

    Arc::new(LocalFs::with_defaults())
}
