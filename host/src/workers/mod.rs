pub mod ffmpeg_supervisor;
pub mod tool_output;
