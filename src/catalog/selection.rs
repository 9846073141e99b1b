//! Faceted drill-down over the selected attributes

use crate::app::prompt::Chooser;
use crate::error::{Error, Result};
use crate::state::data::attr;
use crate::state::index::{Index, ValueCount};

/// How a refinement pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refinement {
    Completed,
    /// The user cancelled; the mask is back to what it was before the pass
    Aborted,
}

/// What to do with a partial selection before refining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingSelection {
    Refine,
    Invert,
    Discard,
}

impl ExistingSelection {
    const ALL: [ExistingSelection; 3] = [Self::Refine, Self::Invert, Self::Discard];

    fn label(self) -> &'static str {
        match self {
            Self::Refine => "Refine",
            Self::Invert => "Invert",
            Self::Discard => "Discard",
        }
    }
}

/// Order candidate values for display: SESSION newest first, everything
/// else by descending combination count. Both sorts are stable.
pub fn rank_values(name: &str, values: &mut [ValueCount]) {
    if name == attr::SESSION {
        values.sort_by(|a, b| b.value.cmp(&a.value));
    } else {
        values.sort_by(|a, b| b.ncombos.cmp(&a.ncombos));
    }
}

/// Narrow the mask to rows whose `name` is one of `chosen`.
///
/// A `None` in `chosen` matches rows where the attribute is absent.
pub fn narrow(index: &mut Index, name: &str, chosen: &[Option<String>]) -> Result<()> {
    let mask: Vec<bool> = index
        .mask()
        .iter()
        .enumerate()
        .map(|(row, &selected)| {
            selected && {
                let value = index.table().get(row, name);
                chosen.iter().any(|c| c.as_deref() == value)
            }
        })
        .collect();
    index.set_mask(mask)
}

/// Walk the selected attributes in order, narrowing the mask by the values
/// the user picks for each.
///
/// The mask active on entry is stashed first, so one `pop_mask` undoes the
/// whole pass.
pub fn refine(index: &mut Index, chooser: &mut dyn Chooser) -> Result<Refinement> {
    if !index.is_fully_selected() {
        let labels: Vec<String> = ExistingSelection::ALL.iter().map(|o| o.label().to_string()).collect();
        let Some(choice) = chooser.select("What would you like to do with existing selection?", &labels, 0) else {
            return Ok(Refinement::Aborted);
        };
        index.stash_mask();
        match ExistingSelection::ALL[choice] {
            ExistingSelection::Refine => {}
            ExistingSelection::Invert => index.invert_mask(),
            ExistingSelection::Discard => index.reset_mask(),
        }
    } else {
        index.stash_mask();
    }

    let attrs = index.selected_attrs().to_vec();
    for name in &attrs {
        let mut values = index.values_for_attr(name)?;
        if values.is_empty() {
            index.pop_mask()?;
            return Err(Error::Validation("no files selected to refine".to_string()));
        }
        rank_values(name, &mut values);

        let chosen: Vec<Option<String>> = if values.len() == 1 {
            vec![values[0].value.clone()]
        } else {
            let labels: Vec<String> = values
                .iter()
                .map(|v| {
                    format!(
                        "{} ({} combinations of {} files)",
                        index.display_value(v.value.as_deref()),
                        v.ncombos,
                        v.nfiles
                    )
                })
                .collect();
            let mut checked = vec![false; values.len()];
            checked[0] = true;

            loop {
                let Some(picked) = chooser.multi_select(&format!("  {}:", name), &labels, &checked) else {
                    index.pop_mask()?;
                    return Ok(Refinement::Aborted);
                };
                if picked.is_empty() {
                    chooser.notify("Error: at least one option needs to be selected");
                    continue;
                }
                break picked.into_iter().filter_map(|i| values.get(i)).map(|v| v.value.clone()).collect();
            }
        };

        narrow(index, name, &chosen)?;
        tracing::debug!("{} narrowed to {} files", name, index.masked_count());
    }

    Ok(Refinement::Completed)
}

/// Let the user pick the selected attributes from every column.
///
/// Returns false when the user cancelled.
pub fn choose_attrs(index: &mut Index, chooser: &mut dyn Chooser) -> bool {
    let all = index.all_attrs(index.selected_attrs());
    let checked: Vec<bool> = all.iter().map(|a| index.selected_attrs().contains(a)).collect();
    match chooser.multi_select("Select attributes:", &all, &checked) {
        Some(picked) => {
            let names: Vec<String> = picked.into_iter().filter_map(|i| all.get(i).cloned()).collect();
            index.set_selected_attrs(&names);
            true
        }
        None => false,
    }
}
