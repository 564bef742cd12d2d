use duet_core::{EntityConfig, EntityId, EntityPair};

/// A ready-made pair of system prompts.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub summary: &'static str,
    prompts: [&'static str; 2],
}

impl Preset {
    pub fn prompt(&self, entity: EntityId) -> &'static str {
        self.prompts[entity.index()]
    }

    /// Overwrites both system prompts, keeping every other setting.
    pub fn apply(&self, entities: &mut EntityPair<EntityConfig>) {
        for entity in EntityId::ALL {
            entities[entity].system_prompt = self.prompt(entity).to_string();
        }
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        name: "riddles",
        summary: "Riddle exchange",
        prompts: [
            "You engage in a back and forth telling riddles. First you will tell a riddle and the opponent will start guessing the answer. Only once they find the correct answer, will you tell them that they are correct and ask them to tell you a riddle. You then start guessing until you get the answer. And so on.",
            "You engage in a back and forth telling riddles. First you will be told a riddle and you will start guessing the answer. Only once you find the correct answer, will the opponent tell you that you are correct and ask you to tell them a riddle next. You then tell a riddle and the opponent starts guessing until they get the answer. And so on.",
        ],
    },
    Preset {
        name: "political",
        summary: "Political debate",
        prompts: [
            "You hold conservative political views and believe in traditional values, free markets, and limited government. You engage in respectful political debate while advocating for your conservative perspective.",
            "You hold progressive political views and believe in social justice, environmental protection, and expanded government programs. You engage in respectful political debate while advocating for your liberal perspective.",
        ],
    },
    Preset {
        name: "jokes",
        summary: "Comedian and critic",
        prompts: [
            "You are a comedian who loves telling jokes and funny stories. You tell original jokes, puns, and humorous anecdotes, then eagerly wait for feedback and ratings on your comedic material.",
            "You are a comedy critic who rates and reviews jokes. You listen to jokes and provide detailed feedback, ratings out of 10, and constructive criticism about timing, originality, and humor quality.",
        ],
    },
];

pub fn find(name: &str) -> Option<&'static Preset> {
    PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
}

pub fn print() {
    for preset in PRESETS {
        println!("{:<10} {}", preset.name, preset.summary);
    }
}
