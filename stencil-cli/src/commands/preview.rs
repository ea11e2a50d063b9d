//! `stencil preview`: print one page of one generated fragment.

use anyhow::{bail, Context, Result};
use clap::Args;

use stencil_pipeline::{page_of, DEFAULT_LINES_PER_PAGE};

use super::SourceArgs;

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Template category to render.
    #[arg(long)]
    pub template: String,

    /// Fragment to show; defaults to the first one.
    #[arg(long)]
    pub fragment: Option<String>,

    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = DEFAULT_LINES_PER_PAGE)]
    pub lines_per_page: usize,
}

impl PreviewArgs {
    pub fn run(self) -> Result<()> {
        let result = self.source.generate(Some(vec![self.template.clone()]), false)?;
        let package = result
            .packages
            .first()
            .with_context(|| format!("no template in category '{}'", self.template))?;
        for failure in package.failures() {
            eprintln!("warning: {}", failure.error);
        }

        let fragments = package.fragments();
        let fragment = match &self.fragment {
            Some(name) => fragments.iter().find(|f| &f.name == name),
            None => fragments.first(),
        };
        let Some(fragment) = fragment else {
            let available: Vec<_> = fragments.iter().map(|f| f.name.as_str()).collect();
            bail!(
                "fragment not found in '{}'; available: {}",
                self.template,
                available.join(", ")
            );
        };

        let total = stencil_pipeline::page(&fragment.content, self.lines_per_page).len();
        let page = page_of(&fragment.content, self.lines_per_page, self.page)
            .with_context(|| format!("page {} out of range (1..={total})", self.page))?;
        println!("== {} (page {}/{total}, from line {}) ==", fragment.name, page.number, page.first_line);
        print!("{}", page.text);
        Ok(())
    }
}
