//component B: Input handling
//Turns switch transitions into gripper open/close commands through the shared cell
pub mod switch;
pub mod actuation;
pub mod input_watcher;
