//! The interactive main loop
//!
//! Each menu entry is a [`Command`]; [`App::dispatch`] runs it against the
//! index. A cancelled prompt ends the current command and returns to the menu.

use super::prompt::Chooser;
use super::view;
use crate::catalog::calibration::{self, Tolerance};
use crate::catalog::organize;
use crate::catalog::selection::{self, Refinement};
use crate::catalog::sync::{self, SyncOp, SyncOptions};
use crate::config::{Config, Layout};
use crate::error::{Error, Result};
use crate::fits::header::{self, MAX_STRING_LEN};
use crate::state::data::attr;
use crate::state::index::Index;
use crate::state::library::CacheInvalidation;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    View,
    FindCalibration,
    FuzzyFindCalibration,
    FindProblemFiles,
    SelectFiles,
    SelectAttrs,
    ModifyAttr,
    Relocate,
    Organize,
    OrganizeSiril,
    FillSessions,
    PriorSelection,
    Save,
    Exit,
}

impl Command {
    pub fn label(self) -> &'static str {
        match self {
            Command::View => "View selection",
            Command::FindCalibration => "Find calibration frames",
            Command::FuzzyFindCalibration => "Fuzzy-find calibration frames",
            Command::FindProblemFiles => "Find problem files",
            Command::SelectFiles => "Select different files",
            Command::SelectAttrs => "Select different attributes",
            Command::ModifyAttr => "Modify an attribute",
            Command::Relocate => "Move selected files to new directory",
            Command::Organize => "Organize folders/filenames",
            Command::OrganizeSiril => "Organize into Siril-friendly structure",
            Command::FillSessions => "Fill missing SESSION values",
            Command::PriorSelection => "Use prior selection",
            Command::Save => "Save changes",
            Command::Exit => "Exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct App<'a> {
    index: Index,
    config: &'a Config,
    cache: &'a mut dyn CacheInvalidation,
    chooser: &'a mut dyn Chooser,
}

impl<'a> App<'a> {
    pub fn new(
        index: Index,
        config: &'a Config,
        cache: &'a mut dyn CacheInvalidation,
        chooser: &'a mut dyn Chooser,
    ) -> Self {
        App {
            index,
            config,
            cache,
            chooser,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Pick attributes and files, then loop over the menu until exit
    pub fn run(&mut self) -> Result<()> {
        selection::choose_attrs(&mut self.index, self.chooser);
        selection::refine(&mut self.index, self.chooser)?;
        if !self.index.changed_rows().is_empty() {
            self.chooser
                .notify("Default values for some attributes (e.g., SESSION) have been autofilled.");
        }

        loop {
            if self.index.masked_count() == 0 {
                self.index.reset_mask();
                if let Err(e) = selection::refine(&mut self.index, self.chooser) {
                    self.chooser.notify(&format!("Error: {}", e));
                }
                continue;
            }

            let Some(command) = self.next_command() else {
                break;
            };
            match self.dispatch(command) {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => self.chooser.notify(&format!("Error: {}", e)),
            }
        }
        Ok(())
    }

    /// Commands that apply to the current state, in menu order
    pub fn menu(&self) -> Vec<Command> {
        let mut commands = vec![
            Command::View,
            Command::FindCalibration,
            Command::FuzzyFindCalibration,
            Command::FindProblemFiles,
            Command::SelectFiles,
            Command::SelectAttrs,
            Command::ModifyAttr,
            Command::Relocate,
            Command::Organize,
            Command::OrganizeSiril,
        ];
        if self.index.has_missing_sessions() {
            commands.push(Command::FillSessions);
        }
        if self.index.prior_selection_size().is_some() {
            commands.push(Command::PriorSelection);
        }
        if !sync::pending_rows(&self.index).is_empty() {
            commands.push(Command::Save);
        }
        commands.push(Command::Exit);
        commands
    }

    fn next_command(&mut self) -> Option<Command> {
        let changed = self.index.changed_rows().len();
        let message = if changed > 0 {
            format!(
                "{} files selected. {} files' attributes have unsaved changes.\nNext task:",
                self.index.masked_count(),
                changed
            )
        } else {
            format!("{} files selected.\nNext task:", self.index.masked_count())
        };
        let commands = self.menu();
        let labels: Vec<String> = commands.iter().map(|c| c.label().to_string()).collect();
        let choice = self.chooser.select(&message, &labels, 0)?;
        commands.get(choice).copied()
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Flow> {
        tracing::debug!("Running {:?}", command);
        match command {
            Command::View => self.view(),
            Command::FindCalibration => self.find_calibration(false)?,
            Command::FuzzyFindCalibration => self.find_calibration(true)?,
            Command::FindProblemFiles => self.find_problem_files()?,
            Command::SelectFiles => {
                if selection::refine(&mut self.index, self.chooser)? == Refinement::Aborted {
                    self.chooser.notify("Selection unchanged.");
                }
            }
            Command::SelectAttrs => {
                selection::choose_attrs(&mut self.index, self.chooser);
            }
            Command::ModifyAttr => self.modify_attr(),
            Command::Relocate => self.relocate()?,
            Command::Organize => self.organize(Layout::Catalog)?,
            Command::OrganizeSiril => self.organize(Layout::Siril)?,
            Command::FillSessions => {
                let question = "Some headers do not have a SESSION keyword. Would you like to fill it in with an autocomputed value?";
                if self.chooser.confirm(question, true) == Some(true) {
                    let filled = self.index.fill_missing_sessions();
                    self.chooser.notify(&format!("SESSION filled for {} files.", filled));
                }
            }
            Command::PriorSelection => self.prior_selection()?,
            Command::Save => self.save(),
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    fn view(&mut self) {
        let options: Vec<String> = [
            "Summary of selected attributes",
            "Paths of selected files",
            "Paths of files with unsaved changes",
            "< Go back",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        loop {
            let text = match self.chooser.select("Show:", &options, 0) {
                Some(0) => {
                    if self.index.selected_attrs().is_empty() {
                        self.chooser
                            .notify("No attributes selected, using default attributes");
                    }
                    view::summary_table(&self.index.summary(&self.config.defaults))
                }
                Some(1) => join_paths(self.index.files()),
                Some(2) => join_paths(
                    self.index
                        .changed_rows()
                        .into_iter()
                        .map(|row| self.index.table().key(row))
                        .collect(),
                ),
                _ => break,
            };
            self.chooser.notify(&text);
        }
    }

    fn find_calibration(&mut self, fuzzy: bool) -> Result<()> {
        let config = self.config;
        let kinds: Vec<String> = config.calibration.keys().cloned().collect();
        let Some(choice) = self.chooser.select("Calibration type:", &kinds, 0) else {
            return Ok(());
        };
        let kind = &kinds[choice];
        let requirement = config.calibration_for(kind)?;

        let report = if fuzzy {
            let mut tolerance = Tolerance::default();
            if requirement.attrs.iter().any(|a| a == attr::EXPTIME) {
                let message = "Match EXPTIME to this many digits [1 = 0.1, 0 = 1, -1 = 10, etc]:";
                let Some(digits) = self.ask_digits(message, tolerance.exposure_digits) else {
                    return Ok(());
                };
                tolerance.exposure_digits = digits;
            }
            if requirement.attrs.iter().any(|a| a == attr::D_CCDTEMP) {
                let message = "Match CCD-TEMP to this many digits [0 = 1, -1 = 10, etc; temperatures are whole degrees]:";
                let Some(digits) = self.ask_digits(message, tolerance.temperature_digits) else {
                    return Ok(());
                };
                tolerance.temperature_digits = digits;
            }
            calibration::resolve_fuzzy(&self.index, kind, requirement, tolerance)
        } else {
            calibration::resolve_exact(&self.index, kind, requirement)
        };

        if report.entries.is_empty() {
            self.chooser
                .notify(&format!("No selected frames need {} calibration.", report.kind));
            return Ok(());
        }
        self.chooser.notify(&view::calibration_table(&report));

        let available = report.available_files();
        if available.is_empty() {
            return Ok(());
        }
        let options: Vec<String> = ["Add to selection", "Replace selection", "Do nothing"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let found = self.index.mask_from_files(&available);
        match self.chooser.select(
            "Viable calibration frames found. What do you want to do with them?",
            &options,
            0,
        ) {
            Some(0) => {
                let mask = self.index.mask().iter().zip(&found).map(|(a, b)| *a || *b).collect();
                self.index.stash_mask();
                self.index.set_mask(mask)?;
            }
            Some(1) => {
                self.index.stash_mask();
                self.index.set_mask(found)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn ask_digits(&mut self, message: &str, default: i32) -> Option<i32> {
        loop {
            let answer = self.chooser.input(message, &default.to_string())?;
            match answer.trim().parse::<i32>() {
                Ok(digits) => return Some(digits),
                Err(_) => self.chooser.notify("Not a valid integer"),
            }
        }
    }

    fn find_problem_files(&mut self) -> Result<()> {
        let groups = self.index.problem_files(self.config);
        if groups.is_empty() {
            self.chooser.notify("No problem files found in current selection.");
            return Ok(());
        }

        let mut rows = Vec::new();
        let mut attrs: Vec<String> = Vec::new();
        for group in &groups {
            self.chooser.notify(&format!(
                "{} FRAMES:\n{}",
                group.image_type.to_uppercase(),
                view::problem_table(&self.index, group)
            ));
            rows.extend(group.rows.iter().copied());
            attrs.extend(group.attrs.iter().cloned());
            attrs.push(attr::D_PATH.to_string());
            attrs.push(attr::D_IMAGETYP.to_string());
        }

        self.chooser
            .notify(&format!("{} problem files found in current selection.", rows.len()));
        if self.chooser.confirm("Refine current selection to only these files?", false) == Some(true) {
            let mask = (0..self.index.len()).map(|row| rows.contains(&row)).collect();
            self.index.stash_mask();
            self.index.set_mask(mask)?;
            self.index.set_selected_attrs(&attrs);
        }
        Ok(())
    }

    fn modify_attr(&mut self) {
        let config = self.config;
        let attrs: Vec<String> = self
            .index
            .all_attrs(&[])
            .into_iter()
            .filter(|a| config.mutable.contains(a))
            .collect();
        if attrs.is_empty() {
            self.chooser.notify("No modifiable attributes configured.");
            return;
        }
        let Some(choice) = self.chooser.select("Select an attribute to modify:", &attrs, 0) else {
            return;
        };
        let name = attrs[choice].clone();

        let Ok(values) = self.index.values_for_attr(&name) else {
            return;
        };
        let mut existing: Vec<String> = values.into_iter().filter_map(|v| v.value).collect();
        // a single shared value leaves nothing to coalesce
        if existing.len() == 1 && !self.has_absent(&name) {
            existing.clear();
        }
        let mut options = existing.clone();
        options.push("[Set New Value]".to_string());

        let Some(choice) = self
            .chooser
            .select("Coalesce around existing value or set new value:", &options, 0)
        else {
            return;
        };
        let value = if choice < existing.len() {
            Some(existing[choice].clone())
        } else {
            match self.ask_new_value(&name) {
                Some(value) => value,
                None => return,
            }
        };

        let changed = self.index.change_attr(&name, value);
        self.chooser.notify(&format!("{} changed on {} files.", name, changed));
    }

    /// True when some masked row lacks `name`
    fn has_absent(&self, name: &str) -> bool {
        self.index
            .masked_rows()
            .into_iter()
            .any(|row| self.index.table().get(row, name).is_none())
    }

    /// Prompt for a new value; `Some(None)` clears the attribute, `None` cancels
    fn ask_new_value(&mut self, name: &str) -> Option<Option<String>> {
        let mut known: Vec<String> = Vec::new();
        for row in 0..self.index.len() {
            if let Some(v) = self.index.table().get(row, name) {
                if !known.iter().any(|k| k == v) {
                    known.push(v.to_string());
                }
            }
        }
        if !known.is_empty() {
            self.chooser
                .notify(&format!("Values found in other files: {:?}", known));
        }

        loop {
            let answer = self.chooser.input(
                &format!("Enter new value (max {} chars), or leave empty to clear:", MAX_STRING_LEN),
                "",
            )?;
            // a header card must hold it once quotes are doubled
            if let Err(e) = header::check_value(&answer) {
                self.chooser.notify(&format!("Error: {}", e));
                continue;
            }
            if answer.is_empty() {
                if self.chooser.confirm(
                    "Are you sure you want to remove all the values for this attribute?",
                    false,
                )? {
                    return Some(None);
                }
                continue;
            }
            if known.contains(&answer)
                || self.chooser.confirm(
                    "Entered value does not match any values found in other files, proceed anyway?",
                    false,
                )?
            {
                return Some(Some(answer));
            }
        }
    }

    /// Ask for a destination directory, offering to create it
    fn prompt_destination(&mut self, message: &str) -> Option<PathBuf> {
        let default = self
            .index
            .root_dir()
            .parent()
            .unwrap_or(self.index.root_dir())
            .to_string_lossy()
            .to_string();
        let answer = self.chooser.input(message, &default)?;
        let destination = PathBuf::from(answer.trim());
        if !destination.exists() {
            let question = format!("{} does not exist, create it?", destination.display());
            if self.chooser.confirm(&question, false) != Some(true) {
                self.chooser.notify("Task aborted.");
                return None;
            }
            if let Err(e) = std::fs::create_dir_all(&destination) {
                self.chooser.notify(&format!("Error: {}", e));
                return None;
            }
        }
        Some(std::fs::canonicalize(&destination).unwrap_or(destination))
    }

    fn relocate(&mut self) -> Result<()> {
        if self.index.has_staged_relocation() {
            return Err(Error::PendingRelocation);
        }
        let Some(destination) = self.prompt_destination("New top-level directory:") else {
            return Ok(());
        };
        let staged = organize::relocate(&mut self.index, &destination)?;
        self.index.add_selected_attrs(&[attr::NEW_PATH]);
        self.chooser.notify(&format!(
            "{} files staged to move under {}. Save changes to move/copy files on disk.",
            staged,
            destination.display()
        ));
        Ok(())
    }

    fn organize(&mut self, layout: Layout) -> Result<()> {
        if self.index.has_staged_relocation() {
            return Err(Error::PendingRelocation);
        }
        if layout == Layout::Siril {
            self.chooser.notify(
                "Warning: the directory structure for Siril assumes you've already standardized the binning, gain, offset and ccd-temp for your selection. These attributes will not be reflected in the directory structure or file names.",
            );
        }
        let Some(root) = self.prompt_destination("New top-level directory:") else {
            return Ok(());
        };
        organize::plan(&mut self.index, self.config.templates(layout), &root)?;
        self.index.add_selected_attrs(&[attr::NEW_NAME, attr::NEW_PATH]);
        self.chooser.notify(
            "New directory structure and filenames prepared. Save changes to move/copy files on disk.",
        );
        Ok(())
    }

    fn prior_selection(&mut self) -> Result<()> {
        let n = self.index.prior_selection_size().ok_or(Error::EmptyStack)?;
        let question = format!("Use prior selection of {} files? Current selection will be lost.", n);
        if self.chooser.confirm(&question, false) == Some(true) {
            self.index.pop_mask()?;
        }
        Ok(())
    }

    fn save(&mut self) {
        let staged = self.index.has_staged_relocation();
        let mut options = SyncOptions {
            op: SyncOp::Move,
            overwrite: false,
            record_rename: false,
            mutable: self.config.mutable.clone(),
        };

        if staged {
            let ops = [SyncOp::Copy, SyncOp::Move, SyncOp::Symlink];
            let labels: Vec<String> = [
                "[Copy] files to the new location, then apply any changes to the copy",
                "[Move] files to the new location, then apply any changes",
                "[Symlink] files to new location. NOTE: Any attribute changes will not be applied unless separately saved to the original file.",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            let Some(choice) = self
                .chooser
                .select("Paths have changed. How do you want to save these changes?", &labels, 0)
            else {
                self.chooser.notify("Save canceled");
                return;
            };
            options.op = ops[choice];
            if options.op != SyncOp::Symlink {
                let Some(overwrite) = self.chooser.confirm("Overwrite existing files, if they exist?", false) else {
                    self.chooser.notify("Save canceled");
                    return;
                };
                options.overwrite = overwrite;
                let renames = (0..self.index.len()).any(|row| self.index.table().get(row, attr::NEW_NAME).is_some());
                if renames {
                    let Some(record) = self.chooser.confirm("Save record of old filenames as a HISTORY entry?", false) else {
                        self.chooser.notify("Save canceled");
                        return;
                    };
                    options.record_rename = record;
                }
            }
        } else {
            self.chooser.notify(&format!(
                "\n{:#^70}\nFile attributes have been changed, but paths have not. If you save now, you will\npermanently modify the original files. If this is undesired, abort and choose\n[Move...] or [Organize...] from the main menu.\n{:#^70}\n",
                " WARNING ", ""
            ));
            if self.chooser.confirm("Are you sure you want to modify the original files?", false) != Some(true) {
                return;
            }
        }

        let today = chrono::Local::now().date_naive();
        let report = sync::sync(&mut self.index, &options, self.cache, today);
        for failure in &report.failures {
            self.chooser
                .notify(&format!("Error: {} ({})", failure.error, failure.file.display()));
        }
        self.chooser.notify(&format!(
            "{} files saved, {} failed.",
            report.synced,
            report.failures.len()
        ));
    }
}

fn join_paths(paths: Vec<&Path>) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
