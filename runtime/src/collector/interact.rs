//! Interactions that make the list reveal more entries.

use crate::driver::PageDriver;
use crate::error::HarvestError;
use crate::profile::Interaction;
use rand::Rng;
use tracing::debug;

/// What an interaction step achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The page was nudged (or left alone on the first page).
    Advanced,
    /// There is no further content to reveal.
    Exhausted,
}

/// Perform the profile's interaction before pass `pass` (1-based).
pub async fn advance(driver: &dyn PageDriver, interaction: &Interaction, pass: u32) -> Step {
    match interaction {
        Interaction::Scroll { key, wheel_delta } => {
            scroll(driver, key, *wheel_delta).await;
            Step::Advanced
        }
        Interaction::Paginate {
            next_selector,
            disabled_class,
        } => {
            // The first pass reads the page we navigated to.
            if pass <= 1 {
                return Step::Advanced;
            }
            next_page(driver, next_selector, disabled_class.as_deref()).await
        }
    }
}

/// Scroll to the end three ways. Any of them may be swallowed by the page,
/// so each failure is logged and the others still run.
pub async fn scroll(driver: &dyn PageDriver, key: &str, wheel_delta: f64) {
    if let Err(e) = driver.scroll_to_end().await {
        debug!("{}", HarvestError::interaction("scroll to end", e));
    }
    if let Err(e) = driver.press_key(key).await {
        debug!("{}", HarvestError::interaction("press key", e));
    }
    if let Err(e) = driver.wheel(0.0, wheel_delta).await {
        debug!("{}", HarvestError::interaction("wheel", e));
    }
}

/// Click the "next" control. Missing or disabled means the end of the list;
/// a lookup that throws is a flat pass, same as a missed click.
async fn next_page(driver: &dyn PageDriver, selector: &str, disabled_class: Option<&str>) -> Step {
    let next = match driver.query_all(selector).await {
        Ok(found) => match found.first() {
            Some(&el) => el,
            None => return Step::Exhausted,
        },
        Err(e) => {
            debug!("{}", HarvestError::interaction("find next page", e));
            return Step::Advanced;
        }
    };

    let disabled_attr = matches!(driver.attribute(next, "disabled").await, Ok(Some(_)));
    let aria_disabled = matches!(
        driver.attribute(next, "aria-disabled").await,
        Ok(Some(v)) if v.eq_ignore_ascii_case("true")
    );
    let class_disabled = match disabled_class {
        Some(marker) => matches!(
            driver.attribute(next, "class").await,
            Ok(Some(classes)) if classes.split_whitespace().any(|c| c == marker)
        ),
        None => false,
    };
    if disabled_attr || aria_disabled || class_disabled {
        return Step::Exhausted;
    }

    if let Err(e) = driver.click(next).await {
        // A missed click shows up as a flat pass and feeds the streak.
        debug!("{}", HarvestError::interaction("click next page", e));
    }
    Step::Advanced
}

/// `base` plus a uniform random extra in `0..=jitter`.
pub fn jittered(base: u64, jitter: u64) -> u64 {
    if jitter == 0 {
        return base;
    }
    base + rand::thread_rng().gen_range(0..=jitter)
}
