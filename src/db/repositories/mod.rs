mod commands;
mod runs;
mod verdicts;
