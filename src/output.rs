//! Terminal output for search results

use crate::highlight::Fragment;
use crate::results::{SearchHit, SearchResults, SuggestResults};
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn color_choice(color: bool) -> ColorChoice {
    if color { ColorChoice::Auto } else { ColorChoice::Never }
}

/// Print ranked hits with their fragments, matches highlighted
pub fn print_results(results: &SearchResults, color: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(color));
    write_results(&mut stdout, results)
}

/// Print suggestions one per line, best first
pub fn print_suggestions(results: &SuggestResults, color: bool) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(color));
    for word in &results.suggestions {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        writeln!(stdout, "{}", word)?;
        stdout.reset()?;
    }
    Ok(())
}

pub fn write_results<W: WriteColor>(out: &mut W, results: &SearchResults) -> io::Result<()> {
    for (i, hit) in results.hits.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        write_hit(out, hit)?;
    }

    if !results.suggestions.is_empty() {
        writeln!(out)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(out, "suggestions:")?;
        out.reset()?;
        let words: Vec<&str> = results.suggestions.iter().map(String::as_str).collect();
        writeln!(out, " {}", words.join(", "))?;
    }

    out.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(
        out,
        "{} of {} hits for '{}'",
        results.hits.len(),
        results.total_count,
        results.term
    )?;
    out.reset()?;
    Ok(())
}

/// Header line, then each fragment (or the plain snippet when there are none)
fn write_hit<W: WriteColor>(out: &mut W, hit: &SearchHit) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
    write!(out, "{}", hit.oid)?;
    out.reset()?;

    write!(out, " [{}]", hit.content_type)?;
    if let Some(container) = hit.container_id.as_deref() {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Blue)))?;
        write!(out, " {}", container)?;
        out.reset()?;
    }
    out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
    writeln!(out, " {:.3}", hit.score)?;
    out.reset()?;

    if hit.fragments.is_empty() {
        writeln!(out, "  {}", hit.snippet)?;
        return Ok(());
    }
    for fragment in &hit.fragments {
        write!(out, "  ")?;
        write_fragment(out, fragment)?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_fragment<W: WriteColor>(out: &mut W, fragment: &Fragment) -> io::Result<()> {
    let text = fragment.text.as_str();
    let mut pos = 0;

    for range in &fragment.matches {
        let start = range.start.clamp(pos, text.len());
        let end = range.end.clamp(start, text.len());
        let (Some(before), Some(matched)) = (text.get(pos..start), text.get(start..end)) else {
            continue;
        };

        write!(out, "{}", before)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(out, "{}", matched)?;
        out.reset()?;
        pos = end;
    }

    write!(out, "{}", text.get(pos..).unwrap_or_default())
}
